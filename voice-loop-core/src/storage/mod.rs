pub mod sidecar;
pub mod take_reader;
pub mod take_writer;
