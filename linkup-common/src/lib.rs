pub mod change;
pub mod model;
pub mod util;
