pub mod approval;
pub mod directory;
pub mod proposal;
pub mod revision;
