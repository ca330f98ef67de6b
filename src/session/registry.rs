use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Stop tokens of the sessions currently running in this process
#[derive(Default)]
pub struct SessionRegistry {
    live: DashMap<Uuid, CancellationToken>,
}

impl SessionRegistry {
    pub fn register(&self, id: Uuid, stop: CancellationToken) {
        self.live.insert(id, stop);
    }

    /// Ask a running session to stop. False if it is not running here.
    pub fn stop(&self, id: &Uuid) -> bool {
        match self.live.get(id) {
            Some(stop) => {
                stop.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &Uuid) {
        self.live.remove(id);
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.live.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_cancels_registered_token() {
        let registry = SessionRegistry::default();
        let id = Uuid::new_v4();
        let stop = CancellationToken::new();
        registry.register(id, stop.clone());

        assert!(registry.contains(&id));
        assert!(registry.stop(&id));
        assert!(stop.is_cancelled());

        registry.remove(&id);
        assert!(registry.is_empty());
        assert!(!registry.stop(&id));
    }
}
