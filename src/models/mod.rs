pub mod head;
pub mod ssd;
pub mod vgg;
