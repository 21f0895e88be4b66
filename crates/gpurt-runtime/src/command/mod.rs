mod container;
pub use container::*;

mod heap;
pub use heap::*;

mod stream;
pub use stream::*;
