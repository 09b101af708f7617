pub mod cart;
pub mod identity;
pub mod item;
