//! A connected gateway: the current snapshot plus the operations callers use.
//!
//! Refreshing takes `&mut self` and reads take `&self`, so a refresh and the
//! resolvers reading its snapshot can never interleave. A new snapshot only
//! replaces the old one once every document of the cycle has arrived.

use crate::client::{
    APPLIANCES, DIRECT_OBJECTS, DOMAIN_OBJECTS, HttpTransport, LOCATIONS, NOTIFICATIONS, STATUS, SmileClient,
    SmileClientError, Transport,
};
use crate::models::smile::{Device, DeviceData, GatewayProfile, Notification, SmileInfo};
use crate::services::commands::{self, Command};
use crate::services::device_data;
use crate::services::thermostats::{Inventory, single_master_thermostat};
use crate::services::version::{self, Probe};
use crate::snapshot::GatewaySnapshot;
use crate::xml::Element;
use chrono::{Local, NaiveDateTime};
use log::{debug, info, warn};
use std::collections::BTreeMap;

#[derive(Debug)]
pub enum SmileError {
    Client(SmileClientError),
    /// Model/firmware not in the compatibility table; never retried.
    UnsupportedDevice(String),
    /// Reachable, but not answering like a Smile.
    ConnectionFailed(String),
    DataMissing(&'static str),
    NotConnected,
}

impl core::fmt::Display for SmileError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SmileError::Client(e) => write!(f, "{}", e),
            SmileError::UnsupportedDevice(s) => write!(f, "unsupported device: {}", s),
            SmileError::ConnectionFailed(s) => write!(f, "connection failed: {}", s),
            SmileError::DataMissing(doc) => write!(f, "gateway returned no {} data", doc),
            SmileError::NotConnected => write!(f, "no snapshot loaded; connect first"),
        }
    }
}

impl std::error::Error for SmileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SmileError::Client(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SmileClientError> for SmileError {
    fn from(value: SmileClientError) -> Self {
        SmileError::Client(value)
    }
}

pub struct GatewaySession<T: Transport = HttpTransport> {
    client: SmileClient<T>,
    info: SmileInfo,
    snapshot: Option<GatewaySnapshot>,
    notifications: BTreeMap<String, Notification>,
}

impl<T: Transport> GatewaySession<T> {
    /// Identify the gateway, then load the first snapshot.
    pub fn connect(client: SmileClient<T>) -> Result<Self, SmileError> {
        let mut session = GatewaySession::identify(client)?;
        session.full_update()?;
        Ok(session)
    }

    /// Probe and classify the gateway without loading a snapshot.
    pub fn identify(client: SmileClient<T>) -> Result<Self, SmileError> {
        let domain_objects = client.get(DOMAIN_OBJECTS)?;
        let probe = match version::probe(&domain_objects)? {
            Probe::NeedsStatus => version::probe_status(&client.get(STATUS)?)?,
            identified => identified,
        };
        let Probe::Identified {
            model,
            version,
            hostname,
            legacy,
        } = probe
        else {
            return Err(SmileError::ConnectionFailed("status.xml did not identify the gateway".to_string()));
        };
        let info = version::resolve(&model, &version, hostname, legacy)?;
        info!(
            "Connected to {} ({} firmware {}, {:?})",
            info.name, info.model, info.version, info.profile
        );

        Ok(GatewaySession {
            client,
            info,
            snapshot: None,
            notifications: BTreeMap::new(),
        })
    }

    pub fn info(&self) -> &SmileInfo {
        &self.info
    }

    pub fn client(&self) -> &SmileClient<T> {
        &self.client
    }

    pub fn snapshot(&self) -> Result<&GatewaySnapshot, SmileError> {
        self.snapshot.as_ref().ok_or(SmileError::NotConnected)
    }

    /// Fetch every document again and swap in the new snapshot.
    pub fn full_update(&mut self) -> Result<(), SmileError> {
        let legacy_power = self.info.profile == GatewayProfile::LegacyPower;

        let appliances = if legacy_power {
            None
        } else {
            let doc = self.client.get(APPLIANCES)?;
            if !self.info.profile.is_legacy() && doc.children_named("appliance").next().is_none() {
                return Err(SmileError::DataMissing("appliance"));
            }
            Some(doc)
        };
        let direct_objects = if legacy_power {
            None
        } else {
            Some(self.client.get(DIRECT_OBJECTS)?)
        };
        let domain_objects = self.client.get(DOMAIN_OBJECTS)?;
        let locations = self.client.get(LOCATIONS)?;

        self.notifications = collect_notifications(&domain_objects);
        self.snapshot = Some(GatewaySnapshot {
            info: self.info.clone(),
            appliances,
            direct_objects,
            domain_objects,
            locations,
        });
        debug!("Snapshot refreshed, {} notification(s)", self.notifications.len());
        Ok(())
    }

    pub fn notifications(&self) -> &BTreeMap<String, Notification> {
        &self.notifications
    }

    pub fn inventory(&self) -> Result<Inventory, SmileError> {
        Ok(Inventory::resolve(self.snapshot()?))
    }

    pub fn all_devices(&self) -> Result<BTreeMap<String, Device>, SmileError> {
        Ok(self.inventory()?.devices)
    }

    pub fn single_master_thermostat(&self) -> Result<Option<bool>, SmileError> {
        Ok(single_master_thermostat(&self.inventory()?.thermostats))
    }

    pub fn device_data(&self, dev_id: &str) -> Result<Option<DeviceData>, SmileError> {
        self.device_data_at(dev_id, Local::now().naive_local())
    }

    /// Device data with schedules evaluated at `now`.
    pub fn device_data_at(&self, dev_id: &str, now: NaiveDateTime) -> Result<Option<DeviceData>, SmileError> {
        let snapshot = self.snapshot()?;
        let inventory = Inventory::resolve(snapshot);
        Ok(device_data::device_data(snapshot, &inventory, dev_id, now))
    }

    pub fn set_temperature(&self, loc_id: &str, temperature: f64) -> Result<bool, SmileError> {
        let command = commands::set_temperature(self.snapshot()?, loc_id, temperature);
        self.send_all(command.into_iter().collect())
    }

    pub fn set_preset(&self, loc_id: &str, preset: &str) -> Result<bool, SmileError> {
        let command = commands::set_preset(self.snapshot()?, loc_id, preset);
        self.send_all(command.into_iter().collect())
    }

    pub fn set_schedule_state(&self, loc_id: &str, name: &str, active: bool) -> Result<bool, SmileError> {
        let commands = commands::set_schedule_state(self.snapshot()?, loc_id, name, active);
        self.send_all(commands)
    }

    /// Switch a plug, or every member of a switching group when `members` is non-empty.
    pub fn set_relay_state(&self, appliance_id: &str, members: &[String], on: bool) -> Result<bool, SmileError> {
        let commands = commands::set_relay_state(self.snapshot()?, appliance_id, members, on);
        self.send_all(commands.unwrap_or_default())
    }

    pub fn delete_notification(&self) -> Result<(), SmileError> {
        self.client.delete(NOTIFICATIONS)?;
        Ok(())
    }

    /// `false` when there is nothing to send.
    fn send_all(&self, commands: Vec<Command>) -> Result<bool, SmileError> {
        if commands.is_empty() {
            debug!("Command target not found; nothing sent");
            return Ok(false);
        }
        for command in commands {
            debug!("PUT {}: {}", command.path, command.body);
            self.client.put(&command.path, &command.body)?;
        }
        Ok(true)
    }
}

fn collect_notifications(domain_objects: &Element) -> BTreeMap<String, Notification> {
    let mut notifications = BTreeMap::new();
    for notification in domain_objects.descendants_named("notification") {
        let (Some(id), Some(kind), Some(message)) = (
            notification.id(),
            notification.child_text("type"),
            notification.child_text("message"),
        ) else {
            warn!("Plugwise notification present but unreadable; inspect {}", DOMAIN_OBJECTS);
            continue;
        };
        notifications.insert(
            id.to_string(),
            Notification {
                kind: kind.to_string(),
                message: message.to_string(),
            },
        );
    }
    notifications
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{RULES, SmileClient};
    use crate::models::smile::DeviceValue;
    use crate::testing::FakeTransport;
    use http::Method;
    use std::num::NonZeroU32;

    fn connect(fake: FakeTransport) -> Result<GatewaySession<FakeTransport>, SmileError> {
        GatewaySession::connect(SmileClient::with_transport(fake, NonZeroU32::new(3).expect("non-zero")))
    }

    fn paths(session: &GatewaySession<FakeTransport>, method: &Method) -> Vec<String> {
        session
            .client()
            .transport()
            .calls_with(method)
            .into_iter()
            .map(|c| c.path)
            .collect()
    }

    #[test]
    fn connect_probes_then_refreshes_in_order() {
        let session = connect(FakeTransport::gateway("anna_v4")).expect("connects");
        assert_eq!(session.info().profile, GatewayProfile::ModernThermostat);
        assert_eq!(
            paths(&session, &Method::GET),
            vec![DOMAIN_OBJECTS, APPLIANCES, DIRECT_OBJECTS, DOMAIN_OBJECTS, LOCATIONS]
        );
    }

    #[test]
    fn legacy_p1_reads_status_and_skips_appliances() {
        let session = connect(FakeTransport::gateway("smile_p1_v2")).expect("connects");
        assert_eq!(session.info().profile, GatewayProfile::LegacyPower);
        assert_eq!(
            paths(&session, &Method::GET),
            vec![DOMAIN_OBJECTS, STATUS, DOMAIN_OBJECTS, LOCATIONS]
        );
    }

    #[test]
    fn unsupported_device_fetches_nothing_else() {
        let doc = "<domain_objects><module><vendor_name>Plugwise</vendor_name></module>\
                   <gateway><vendor_model>smile_thermo</vendor_model><firmware_version>9.1.0</firmware_version></gateway>\
                   </domain_objects>";
        let fake = FakeTransport::new().with_document(DOMAIN_OBJECTS, doc);
        let err = GatewaySession::connect(SmileClient::with_transport(&fake, NonZeroU32::new(1).expect("non-zero")))
            .err()
            .expect("unsupported");
        assert!(matches!(err, SmileError::UnsupportedDevice(ref k) if k == "smile_thermo_v9"));
        assert_eq!(fake.calls().len(), 1);
    }

    #[test]
    fn stretch_hub_fetches_nothing_else() {
        let doc = "<domain_objects><module><vendor_name>Plugwise</vendor_name>\
                   <protocols><network_router><network/></network_router></protocols></module>\
                   </domain_objects>";
        let fake = FakeTransport::new().with_document(DOMAIN_OBJECTS, doc);
        let err = GatewaySession::connect(SmileClient::with_transport(&fake, NonZeroU32::new(1).expect("non-zero")))
            .err()
            .expect("unsupported");
        assert!(matches!(err, SmileError::UnsupportedDevice(_)));
        assert_eq!(fake.calls().len(), 1);
    }

    #[test]
    fn failed_refresh_keeps_previous_snapshot() {
        let mut session = connect(FakeTransport::gateway("anna_v4")).expect("connects");
        session.client().transport().fail_next(100);
        assert!(matches!(session.full_update(), Err(SmileError::Client(SmileClientError::Connectivity(_)))));
        assert!(session.snapshot().is_ok());
        assert!(session.all_devices().expect("devices").contains_key("01b85360fdd243d0aaad4d6ac2a5ba7e"));
    }

    #[test]
    fn legacy_anna_preset() {
        let session = connect(FakeTransport::gateway("legacy_anna")).expect("connects");
        let thermostat = "0d0c3ea4de8f4b5c9d2a7e4d5c0b8f71";
        let data = session.device_data(thermostat).expect("snapshot").expect("device");
        assert_eq!(data.get("active_preset"), Some(&DeviceValue::Text("away".into())));
        assert_eq!(session.single_master_thermostat().expect("snapshot"), Some(true));
    }

    #[test]
    fn p1_v3_net_electricity() {
        let session = connect(FakeTransport::gateway("p1v3")).expect("connects");
        let devices = session.all_devices().expect("devices");
        let (gateway_id, _) = devices
            .iter()
            .find(|(_, d)| d.class.as_str() == "gateway")
            .expect("gateway listed");
        let data = session.device_data(gateway_id).expect("snapshot").expect("device");
        assert_eq!(data.get("electricity_consumed_peak_point"), Some(&DeviceValue::Float(644.0)));
        assert_eq!(data.get("electricity_produced_peak_cumulative"), Some(&DeviceValue::Float(0.0)));
        assert_eq!(data.get("net_electricity_point"), Some(&DeviceValue::Float(644.0)));
    }

    #[test]
    fn unknown_schedule_sends_nothing() {
        let session = connect(FakeTransport::gateway("anna_v4")).expect("connects");
        let changed = session
            .set_schedule_state("eb5309212bf5407bb143e5bfa3b18aee", "Does not exist", true)
            .expect("no transport error");
        assert!(!changed);
        assert!(session.client().transport().calls_with(&Method::PUT).is_empty());
    }

    #[test]
    fn schedule_change_is_put() {
        let session = connect(FakeTransport::gateway("anna_v4")).expect("connects");
        assert!(
            session
                .set_schedule_state("eb5309212bf5407bb143e5bfa3b18aee", "Thuiswerken", true)
                .expect("accepted")
        );
        let puts = session.client().transport().calls_with(&Method::PUT);
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].path, format!("{};id=d3ce834534114348be628b61b26d9220", RULES));
        assert!(puts[0].body.as_deref().is_some_and(|b| b.contains("<active>true</active>")));
    }

    #[test]
    fn rejected_preset_and_unknown_relay_are_false() {
        let session = connect(FakeTransport::gateway("adam_plus_anna")).expect("connects");
        assert!(!session.set_preset("f2bf9048bef64cc5b6d5110154e33c81", "party").expect("no error"));
        assert!(!session.set_relay_state("missing", &[], true).expect("no error"));
        assert!(session.set_relay_state("aa6b0002df0a46e1b1eb94beb61eddfe", &[], true).expect("sent"));
        assert_eq!(session.client().transport().calls_with(&Method::PUT).len(), 1);
    }

    #[test]
    fn notifications_are_collected_and_deleted() {
        let session = connect(FakeTransport::gateway("adam_plus_anna")).expect("connects");
        let note = &session.notifications()["af82e4ccf9c548528166d38e560662a4"];
        assert_eq!(note.kind, "warning");
        assert!(note.message.contains("unreachable"));
        session.delete_notification().expect("accepted");
        assert_eq!(paths(&session, &Method::DELETE), vec![NOTIFICATIONS]);
    }

    #[test]
    fn identified_session_has_no_snapshot_yet() {
        let fake = FakeTransport::gateway("anna_v4");
        let mut session =
            GatewaySession::identify(SmileClient::with_transport(&fake, NonZeroU32::new(1).expect("non-zero")))
                .expect("identifies");
        assert!(matches!(session.all_devices(), Err(SmileError::NotConnected)));
        assert_eq!(fake.calls().len(), 1);
        session.full_update().expect("refreshes");
        assert!(session.all_devices().is_ok());
    }

    #[test]
    fn connect_surfaces_http_errors() {
        let fake = FakeTransport::new();
        let err = connect(fake).err().expect("nothing served");
        assert!(matches!(err, SmileError::Client(SmileClientError::Http { status: 404, .. })));
    }
}
