pub mod app_lock;
pub mod device_lock;

pub use app_lock::{app_lock_loop, resolve_foreground, AppLockDeps};
pub use device_lock::{device_lock_loop, DeviceLockDeps, LockState};
