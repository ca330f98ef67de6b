//! Candidate selection: which running pods the target allows us to touch

use tracing::debug;

use super::ChaosError;
use crate::cluster::{ClusterGateway, PodInfo};
use crate::config::{NamespaceSelector, Operator, SelectorError, TargetConfig};

/// List pods and narrow them down to the candidate set.
///
/// Returns [`ChaosError::NoCandidates`] when the filters leave nothing.
pub async fn select_candidate_pods(
    gateway: &dyn ClusterGateway,
    target: &TargetConfig,
) -> Result<Vec<PodInfo>, ChaosError> {
    let scope = target.namespaces.single_namespace();
    let pods = gateway.list_pods(scope, "").await?;
    debug!("Listed {} pods (scope: {})", pods.len(), scope.unwrap_or("all"));

    let pods = filter_by_namespaces(pods, &target.namespaces)?;
    let pods = include_by_node_name(pods, &target.included_node_names);
    let pods = include_by_pod_name(pods, &target.included_pod_names);
    let pods = exclude_by_pod_name(pods, &target.excluded_pod_names);
    let pods = drop_terminating(pods);

    if pods.is_empty() {
        return Err(ChaosError::NoCandidates);
    }
    Ok(pods)
}

// ============================================================================
// SBIO: Pure filters
// ============================================================================

/// Keep pods whose namespace satisfies the selector.
///
/// The namespace name is evaluated as the only label key of the pod. A pod
/// passes when it matches at least one existence term (or there are none)
/// and every does-not-exist term.
pub fn filter_by_namespaces(
    pods: Vec<PodInfo>,
    selector: &NamespaceSelector,
) -> Result<Vec<PodInfo>, SelectorError> {
    if selector.is_empty() {
        return Ok(pods);
    }
    selector.ensure_supported()?;

    let (includes, excludes): (Vec<_>, Vec<_>) = selector
        .requirements()
        .iter()
        .partition(|r| r.operator == Operator::Exists);

    Ok(pods
        .into_iter()
        .filter(|pod| {
            let included =
                includes.is_empty() || includes.iter().any(|r| r.matches_key(&pod.namespace));
            included && excludes.iter().all(|r| r.matches_key(&pod.namespace))
        })
        .collect())
}

/// Keep pods scheduled on a node whose name contains any listed token.
pub fn include_by_node_name(pods: Vec<PodInfo>, filter: &str) -> Vec<PodInfo> {
    include_matching(pods, filter, |pod| pod.node_name.as_str())
}

/// Keep pods whose name contains any listed token.
pub fn include_by_pod_name(pods: Vec<PodInfo>, filter: &str) -> Vec<PodInfo> {
    include_matching(pods, filter, |pod| pod.name.as_str())
}

/// Drop pods whose name contains any listed token. Empty filter drops nothing.
pub fn exclude_by_pod_name(pods: Vec<PodInfo>, filter: &str) -> Vec<PodInfo> {
    if filter.is_empty() {
        return pods;
    }
    // Blank tokens would match every name
    let tokens: Vec<&str> = tokens(filter).into_iter().filter(|t| !t.is_empty()).collect();
    pods.into_iter()
        .filter(|pod| !tokens.iter().any(|t| pod.name.contains(t)))
        .collect()
}

/// Pods already being deleted are never candidates.
pub fn drop_terminating(pods: Vec<PodInfo>) -> Vec<PodInfo> {
    pods.into_iter().filter(|p| !p.is_terminating()).collect()
}

// NOTE: an empty include filter is a single empty token, and every name
// contains "", so an unset include filter keeps every pod. Same for a
// trailing comma ("web,"). Existing scenarios rely on this. Tokens are
// trimmed so "web, api" works, which also makes a whitespace-only filter
// (" ") keep every pod rather than only names containing a space.
fn include_matching<F>(pods: Vec<PodInfo>, filter: &str, field: F) -> Vec<PodInfo>
where
    F: Fn(&PodInfo) -> &str,
{
    let tokens = tokens(filter);
    pods.into_iter()
        .filter(|pod| tokens.iter().any(|t| field(pod).contains(t)))
        .collect()
}

fn tokens(filter: &str) -> Vec<&str> {
    filter.split(',').map(str::trim).collect()
}
