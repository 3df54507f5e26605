//! Subject resolution and cached policy collections
//!
//! Both caches hold an `Arc` to an immutable snapshot. Readers clone the
//! `Arc` and work on it for the rest of the request; the refresher builds a
//! complete replacement and swaps it in.

mod policies;
mod refresher;
mod subjects;

pub use policies::{PolicyQuery, PolicySnapshot, PolicyStore};
pub use refresher::{PolicyRefresher, RefresherHandle};
pub use subjects::{Subject, SubjectResolver, SubjectSnapshot};
