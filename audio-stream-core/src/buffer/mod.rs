pub mod fixed_buffer;
pub mod record_ring;
