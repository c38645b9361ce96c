/// Name of the canonical attribute holding the indexed vectors themselves.
/// Every engine write stores it; counts and key iteration are measured on it.
pub const PATCH: &str = "patch";

/// Maximum number of projection bits that fit in a bucket key.
pub const MAX_NBITS: usize = 64;

/// Padding applied to the spectral bounding box so training points fall
/// strictly inside it.
pub const BOUNDS_EPS: f32 = 1e-8;
