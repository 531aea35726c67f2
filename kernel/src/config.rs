use kidneyos_shared::sizes::MB;

/// Number of physical frames in the user pool.
pub const USER_FRAMES: usize = 256;
/// Largest distance below `PHYS_BASE` the stack may grow to.
pub const STACK_LIMIT: usize = 8 * MB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    pub user_frames: usize,
    pub stack_limit: usize,
}

impl VmConfig {
    pub fn with_frames(user_frames: usize) -> Self {
        Self {
            user_frames,
            ..Self::default()
        }
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            user_frames: USER_FRAMES,
            stack_limit: STACK_LIMIT,
        }
    }
}
