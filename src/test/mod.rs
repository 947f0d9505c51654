pub mod api;
pub mod tuition;
pub mod users;
pub mod utils;
