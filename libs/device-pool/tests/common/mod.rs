#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use device_pool::{
    Credentials, CurrentUser, DevicePoolClient, DeviceRecord, DeviceRef, MemoryControlPlane,
};

pub const TOKEN: &str = "integration-token";
pub const ORG: &str = "acme";

pub fn user() -> CurrentUser {
    CurrentUser {
        id: "tester".into(),
        org: ORG.into(),
        name: "Tester".into(),
        email: "tester@example.com".into(),
        teams: Vec::new(),
    }
}

/// A control plane with `count` public devices named `dev-0`, `dev-1`, ...
pub fn plane_with_devices(count: usize) -> MemoryControlPlane {
    let plane = MemoryControlPlane::new();
    plane.add_user(TOKEN, user());
    for i in 0..count {
        let mut record = DeviceRecord::new(DeviceRef::new(ORG, format!("dev-{i}")));
        record.rack.device_make = if i % 2 == 0 { "X" } else { "Y" }.into();
        record.device.device_model = format!("{}", i % 3);
        record.metadata.name = format!("Device {i}");
        plane.add_device(record);
    }
    plane
}

pub fn client(plane: &MemoryControlPlane, renewal_interval: Duration) -> DevicePoolClient {
    DevicePoolClient::builder()
        .stub(Arc::new(plane.clone()))
        .auth(Arc::new(plane.clone()))
        .credentials(Credentials::api_key(TOKEN))
        .renewal_interval(renewal_interval)
        .build()
        .expect("client builds")
}

pub async fn started(plane: &MemoryControlPlane) -> DevicePoolClient {
    let client = client(plane, Duration::from_secs(30));
    client.start().await.expect("client starts");
    client
}

/// Every device under renewal has a secret on file and vice versa.
pub async fn assert_consistent(client: &DevicePoolClient) {
    assert_eq!(client.held_devices().await, client.secrets().devices());
}
