//! In-process control plane built from the config's `simulation` section.

use std::time::Duration;

use config::wire::Simulation;
use device_pool::{CurrentUser, DeviceRecord, DeviceRef, MemoryControlPlane};
use tracing::debug;

/// A control plane holding the configured devices, accepting `token` as the
/// simulation user.
pub fn build_plane(sim: &Simulation, token: &str) -> MemoryControlPlane {
    let plane = MemoryControlPlane::new();
    plane.add_user(
        token,
        CurrentUser {
            id: sim.user.clone(),
            org: sim.org.clone(),
            name: sim.user.clone(),
            email: String::new(),
            teams: Vec::new(),
        },
    );
    if let Some(ttl) = sim.lease_ttl {
        plane.set_lease_ttl(ttl);
    }
    if let Some(ms) = sim.latency_ms {
        plane.set_latency(Duration::from_millis(ms));
    }

    for dev in &sim.devices {
        let reference = DeviceRef::new(&sim.org, &dev.id);
        let mut record = DeviceRecord::new(reference.clone());
        record.metadata.name = if dev.name.is_empty() {
            dev.id.clone()
        } else {
            dev.name.clone()
        };
        record.metadata.owner = dev.owner.clone();
        record.rack.device_make = dev.make.clone();
        record.device.device_model = dev.model.clone();
        plane.add_device(record);
        if !dev.alive {
            plane.set_alive(&reference, false);
        }
        debug!(device = %reference, "simulated device added");
    }
    plane
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_pool::{AuthProvider, Credentials, DeviceStub};

    fn simulation() -> Simulation {
        let cfg = config::ClientConfig::parse_str(
            r#"
simulation:
  org: acme
  user: sim-user
  devices:
    - id: stb-1
      make: X
    - id: stb-2
      name: Living room
      owner:
        user: sim-user
"#,
        )
        .unwrap();
        cfg.simulation().unwrap().clone()
    }

    #[tokio::test]
    async fn test_plane_serves_configured_devices() {
        let plane = build_plane(&simulation(), "tok");
        let user = plane.current_user(&Credentials::api_key("tok")).await.unwrap();
        assert_eq!(user.org, "acme");
        assert_eq!(user.id, "sim-user");

        let devices = plane.list_devices("acme").await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].metadata.name, "stb-1");
        assert_eq!(devices[0].rack.device_make, "X");
        assert_eq!(devices[1].metadata.name, "Living room");
        assert_eq!(devices[1].metadata.owner.user, "sim-user");
    }
}
