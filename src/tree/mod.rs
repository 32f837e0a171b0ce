pub mod task_tree;

pub use task_tree::{TaskTree, TreeError, TreeStatistics};
