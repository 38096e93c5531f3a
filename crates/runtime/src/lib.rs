//! The message orchestration and reply scheduler: everything between "a
//! message arrives" and "a reply is sent". Admission, bundling, gating,
//! turn execution, cancellation, delayed jobs, and crash recovery.
//!
//! Entry point for inbound traffic: [`handlers::handle_frame`]. Turn
//! execution: [`turn::run_turn`].

pub mod bundler;
pub mod context;
pub mod delay_worker;
pub mod emo;
pub mod gate;
pub mod handlers;
pub mod intervention;
pub mod overlays;
pub mod recovery;
pub mod runs;
pub mod state;
pub mod transport;
pub mod turn;

pub use state::AppState;

/// Current wall-clock time as epoch milliseconds, the unit used for run
/// cutoffs and delay-queue due times.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
