/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Small epsilon below which a float is treated as zero (MAD and
/// flat-field guards).
pub const EPSILON: f32 = 1e-10;

/// Default robust threshold, in MADs, for bad-pixel flagging.
pub const DEFAULT_BP_THRESHOLD: f32 = 7.0;

/// Default fraction of a chop/nod half-period discarded around each
/// phase boundary while the mechanism settles.
pub const DEFAULT_SETTLE_FRACTION: f64 = 0.05;

/// Default cap on simultaneously resident frames in memory-saving mode.
pub const DEFAULT_MAX_FRAMES_INMEM: usize = 200;

/// Default raw file naming template (single `*` marks the file number).
pub const DEFAULT_RAW_NAME_FMT: &str = "gsnapImg*.fits";
