/// Name reported by the admin surface.
pub const SERVER_NAME: &str = "Rayo Gateway";

/// Platform used for clients whose application does not name one.
pub const DEFAULT_PLATFORM: &str = "staging";

/// Dial attempts made after the first one fails.
pub const DEFAULT_MAX_DIAL_RETRIES: u32 = 3;

/// A node with more consecutive errors than this is skipped by selection.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Separator between a bare JID and its resource.
pub const RESOURCE_SEPARATOR: char = '/';

/// Separator between the node part and the domain of a JID.
pub const NODE_SEPARATOR: char = '@';
