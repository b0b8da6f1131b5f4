pub mod alert;
pub mod decision;
pub mod event;
pub mod machine;
pub mod meta;
