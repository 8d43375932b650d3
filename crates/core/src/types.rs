/// Identifier of an admitted task.
///
/// This is the client's process id, the same number the command channel
/// carries (`R,<pid>,...`, `Y,<pid>`, `D,<pid>`).
pub type TaskId = u32;
