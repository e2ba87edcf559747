mod user;
mod forms;
mod task;

pub use user::User;
pub use forms::{from_body, validate_pending_ids, TaskBody, UserBody};
pub use task::{coerce_completed, parse_deadline, Task, UNASSIGNED};
