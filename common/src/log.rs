//! Status macros on top of `tracing`.
//!
//! Events are emitted under dedicated targets so the terminal formatter can
//! render them with their own symbol while still honoring `RUST_LOG`.

pub const SUCCESS_TARGET: &str = "tilestitch::success";

#[macro_export]
macro_rules! success {
    ($($arg:tt)*) => {
        $crate::__tracing::info!(target: $crate::log::SUCCESS_TARGET, $($arg)*)
    };
}
