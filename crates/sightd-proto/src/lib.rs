pub mod sightd {
    pub mod v1 {
        include!(concat!(env!("OUT_DIR"), "/sightd.v1.rs"));
    }
}

pub const FILE_DESCRIPTOR_SET: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/sightd_descriptor.bin"));
