mod image_relocator;

pub use image_relocator::ImageRelocator;
