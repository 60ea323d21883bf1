//! Managed resource kinds.

pub mod guestbook;
pub mod student;

pub use guestbook::{Guestbook, GuestbookSpec, GuestbookStatus};
pub use student::{GRADUATION_THRESHOLD, Student, StudentSpec, StudentStatus, average_grade};
