/// Lifecycle of one `(source, range)` entry in the feature cache.
///
/// Fetching → Resident, or Fetching → Failed → (retry) Fetching. Writes made
/// directly through the cache land as Resident.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResidencyState {
    Fetching,
    Resident,
    Failed,
}

impl ResidencyState {
    pub fn is_resident(self) -> bool {
        self == ResidencyState::Resident
    }
}
