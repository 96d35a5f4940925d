use dashmap::DashMap;

/// Display name used when a driver has no directory record.
pub const UNKNOWN_DRIVER_NAME: &str = "Unknown";

/// Read-only view of driver records owned by another service.
pub trait DriverDirectory: Send + Sync {
    fn display_name(&self, driver_id: &str) -> Option<String>;

    fn contains(&self, driver_id: &str) -> bool {
        self.display_name(driver_id).is_some()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    names: DashMap<String, String>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, driver_id: impl Into<String>, name: impl Into<String>) {
        self.names.insert(driver_id.into(), name.into());
    }

    pub fn unregister(&self, driver_id: &str) -> bool {
        self.names.remove(driver_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl DriverDirectory for InMemoryDirectory {
    fn display_name(&self, driver_id: &str) -> Option<String> {
        self.names.get(driver_id).map(|name| name.value().clone())
    }
}
