pub mod attendance;
pub mod config;
pub mod courses;
pub mod pickups;
pub mod recovery;
pub mod sessions;
pub mod students;
pub mod tuition;
pub mod users;

pub use attendance::*;
pub use config::*;
pub use courses::*;
pub use pickups::*;
pub use recovery::*;
pub use sessions::*;
pub use students::*;
pub use tuition::*;
pub use users::*;
