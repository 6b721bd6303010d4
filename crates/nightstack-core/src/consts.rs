/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;

/// ITU-R BT.601 luminance coefficient for the red channel.
pub const LUMINANCE_R: f32 = 0.299;

/// ITU-R BT.601 luminance coefficient for the green channel.
pub const LUMINANCE_G: f32 = 0.587;

/// ITU-R BT.601 luminance coefficient for the blue channel.
pub const LUMINANCE_B: f32 = 0.114;

/// Default detection threshold in noise sigmas above the sky background.
pub const DEFAULT_DETECTION_SIGMA: f32 = 5.0;

/// Normalized intensity at or above which a star is considered saturated
/// and excluded from quality scoring and matching.
pub const SATURATION_LEVEL: f32 = 0.98;

/// Largest plausible star radius in pixels; the half-maximum walk stops here.
pub const STAR_MAX_RADIUS: usize = 16;

/// Smallest FWHM (pixels) accepted as a real star rather than a hot pixel.
pub const MIN_STAR_FWHM: f32 = 1.0;

/// Maximum number of detected stars retained per frame, brightest first.
pub const MAX_STARS_PER_FRAME: usize = 200;

/// Number of brightest stars considered by the transform solver.
pub const SOLVER_STAR_LIMIT: usize = 32;

/// Pairwise-distance agreement tolerance (pixels) during star matching.
pub const MATCH_DISTANCE_TOLERANCE: f64 = 2.0;

/// Minimum matched star pairs required to accept a transform fit.
pub const MIN_TRANSFORM_MATCHES: usize = 3;

/// Default kappa for kappa-sigma clipping.
pub const DEFAULT_KAPPA: f32 = 2.0;

/// Default iteration count for iterative combine methods.
pub const DEFAULT_COMBINE_ITERATIONS: usize = 5;

/// Half-width of the square window used for entropy maps. The window
/// spans `2 * ENTROPY_WINDOW + 1` pixels per side, as in the tiled
/// entropy-square scheme.
pub const ENTROPY_WINDOW: usize = 10;

/// Histogram bins used when quantizing a window for entropy estimation.
pub const ENTROPY_BINS: usize = 16;

/// Upper clamp on the optimized dark-subtraction scale factor.
pub const MAX_DARK_FACTOR: f32 = 4.0;

/// Magic bytes at the start of a running-stack snapshot.
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"NSTACK01";

/// Upper bound on the total sample count a snapshot may declare, checked
/// before any allocation so a corrupt header cannot trigger an enormous
/// allocation or an arithmetic overflow.
pub const SNAPSHOT_MAX_SAMPLES: usize = 1 << 28;
