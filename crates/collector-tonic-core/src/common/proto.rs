//! Generated protobuf bindings.

#![allow(clippy::all, clippy::pedantic)]

tonic::include_proto!("collector");

/// Encoded file descriptor set for the reflection service.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("collector_descriptor");

impl From<OsInfo> for collector_register::OsInfo {
    fn from(info: OsInfo) -> Self {
        Self {
            os_name: info.os_name,
            host_name: info.host_name,
            process_no: info.process_no,
            ipv4s: info.ipv4s,
        }
    }
}

impl From<collector_register::OsInfo> for OsInfo {
    fn from(info: collector_register::OsInfo) -> Self {
        Self {
            os_name: info.os_name,
            host_name: info.host_name,
            process_no: info.process_no,
            ipv4s: info.ipv4s,
        }
    }
}
