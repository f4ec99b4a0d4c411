pub mod builder;
pub mod cancel;
pub mod context;
pub mod error;
pub mod fanout;
pub mod node;
pub mod parameters;
pub mod providers;
pub mod query;
pub mod split_selector;
pub mod stop_criteria;
pub mod trainer;
pub mod value;
