//! Identifier helpers for threads and tasks.

/// Stable task identifier: `"{round}:{encoded_node}:{path}"`.
///
/// Deterministic for a given round, so a re-executed task after a resume
/// reuses the id of its original attempt and its recorded writes line up.
#[must_use]
pub fn task_id(round: i64, encoded_node: &str, path: &str) -> String {
    format!("{round}:{encoded_node}:{path}")
}

/// Fresh random thread identifier.
#[must_use]
pub fn new_thread_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
