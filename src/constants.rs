// Port configuration
pub const DEFAULT_PORT: u16 = 3001;

// Refresh cycle
pub const DEFAULT_FETCH_COUNT: usize = 10;
// Offsets are drawn from [-span/2, +span/2], so pins land within ~0.0007° of the fix
pub const JITTER_DIVISOR: f64 = 700.0;
pub const DEFAULT_JITTER_SPAN: f64 = 1.0 / JITTER_DIVISOR;

pub const DEFAULT_IMAGE_URLS: &[&str] = &[
    "https://metaverse.imgix.net/ea654773-6968-4266-8930-8fe697752ad7.png?w=110&h=110",
    "https://metaverse.imgix.net/f0535170-ef0a-441f-be76-2c9c1d2ebfd2.png?w=110&h=110",
];

// Image sizes
pub const MARKER_ICON_SIZE: u32 = 110;

// Camera
pub const DEFAULT_MIN_ZOOM: f64 = 16.0;
pub const DEFAULT_MAX_ZOOM: f64 = 21.0;

// Networking
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;
pub const SSE_HEARTBEAT_SECS: u64 = 30;
pub const MAP_EVENT_CAPACITY: usize = 256;
