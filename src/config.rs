/// Capacity classes for pooled string storage.
///
/// Samples that carry text take a slot from the class matching their
/// length. A class that runs dry borrows from the next larger one; when
/// the large class is dry too, allocation fails.
#[derive(Debug, Clone)]
pub struct StringTierConfig {
    /// Longest string (bytes) served from the small class.
    pub small_max_len: usize,
    /// Slots in the small class.
    pub small_capacity: usize,
    /// Longest string (bytes) served from the medium class.
    pub medium_max_len: usize,
    /// Slots in the medium class.
    pub medium_capacity: usize,
    /// Slots in the large class (anything longer than `medium_max_len`).
    pub large_capacity: usize,
}

impl Default for StringTierConfig {
    fn default() -> Self {
        Self {
            small_max_len: 63,
            small_capacity: 1000,
            medium_max_len: 1023,
            medium_capacity: 250,
            large_capacity: 50,
        }
    }
}

/// Tunables for a hub instance. Fixed at construction time.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Longest permitted entry name, in bytes.
    pub max_name_bytes: usize,

    /// Longest permitted path, in bytes.
    pub max_path_bytes: usize,

    /// How many tree entries may exist at once.
    pub entry_capacity: usize,

    /// String storage classes for text-bearing samples.
    pub strings: StringTierConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_name_bytes: 63,
            max_path_bytes: 1023,
            entry_capacity: 4096,
            strings: StringTierConfig::default(),
        }
    }
}
