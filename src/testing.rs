//! Fixture loading and an in-memory transport for unit tests.

use crate::client::{
    APPLIANCES, DIRECT_OBJECTS, DOMAIN_OBJECTS, LOCATIONS, RawResponse, STATUS, SmileClientError, Transport, decode_body,
};
use crate::services::version::{self, Probe};
use crate::snapshot::GatewaySnapshot;
use crate::xml::{Element, parse_gateway_document};
use http::Method;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::Path;

const FIXTURE_FILES: [(&str, &str); 5] = [
    ("core.appliances.xml", APPLIANCES),
    ("core.direct_objects.xml", DIRECT_OBJECTS),
    ("core.domain_objects.xml", DOMAIN_OBJECTS),
    ("core.locations.xml", LOCATIONS),
    ("system.status.xml", STATUS),
];

fn fixture_path(setup: &str, file: &str) -> String {
    format!("tests/data/{}/{}", setup, file)
}

pub fn fixture_text(setup: &str, file: &str) -> String {
    std::fs::read_to_string(fixture_path(setup, file)).expect("fixture present")
}

pub fn fixture_document(setup: &str, file: &str) -> Element {
    parse_gateway_document(&fixture_text(setup, file)).expect("fixture parses")
}

fn optional_document(setup: &str, file: &str) -> Option<Element> {
    let path = fixture_path(setup, file);
    Path::new(&path).is_file().then(|| fixture_document(setup, file))
}

/// Build the snapshot a connected session would hold for `setup`.
pub fn load_snapshot(setup: &str) -> GatewaySnapshot {
    let domain_objects = fixture_document(setup, "core.domain_objects.xml");
    let probe = match version::probe(&domain_objects).expect("fixture is identifiable") {
        Probe::NeedsStatus => {
            version::probe_status(&fixture_document(setup, "system.status.xml")).expect("status identifies")
        }
        identified => identified,
    };
    let Probe::Identified {
        model,
        version,
        hostname,
        legacy,
    } = probe
    else {
        panic!("fixture {} not identified", setup);
    };
    let info = version::resolve(&model, &version, hostname, legacy).expect("fixture is supported");

    GatewaySnapshot {
        info,
        appliances: optional_document(setup, "core.appliances.xml"),
        direct_objects: optional_document(setup, "core.direct_objects.xml"),
        domain_objects,
        locations: fixture_document(setup, "core.locations.xml"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub body: Option<String>,
}

/// Serves canned responses by path and records every attempt.
#[derive(Default)]
pub struct FakeTransport {
    responses: BTreeMap<String, RawResponse>,
    raw_bodies: BTreeMap<String, Vec<u8>>,
    failures: Cell<u32>,
    calls: RefCell<Vec<Call>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport::default()
    }

    /// Serve every fixture file present for `setup`.
    pub fn gateway(setup: &str) -> Self {
        let mut fake = FakeTransport::new();
        for (file, path) in FIXTURE_FILES {
            if Path::new(&fixture_path(setup, file)).is_file() {
                fake = fake.with_document(path, &fixture_text(setup, file));
            }
        }
        fake
    }

    pub fn with_document(self, path: &str, body: &str) -> Self {
        self.with_response(path, 200, body)
    }

    pub fn with_response(mut self, path: &str, status: u16, body: &str) -> Self {
        self.responses.insert(
            path.to_string(),
            RawResponse {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    /// Answer `path` with 200 and a body that is not UTF-8.
    pub fn with_malformed(mut self, path: &str) -> Self {
        self.raw_bodies.insert(path.to_string(), vec![b'<', 0xff, 0xfe, b'/', b'>']);
        self
    }

    /// Make the next `n` attempts fail as if the gateway timed out.
    pub fn fail_next(&self, n: u32) {
        self.failures.set(n);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn calls_with(&self, method: &Method) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.method == *method).collect()
    }
}

impl Transport for FakeTransport {
    fn send(&self, method: &Method, path: &str, body: Option<&str>) -> Result<RawResponse, SmileClientError> {
        self.calls.borrow_mut().push(Call {
            method: method.clone(),
            path: path.to_string(),
            body: body.map(str::to_string),
        });
        if self.failures.get() > 0 {
            self.failures.set(self.failures.get() - 1);
            return Err(SmileClientError::Connectivity("timed out".to_string()));
        }
        if let Some(bytes) = self.raw_bodies.get(path) {
            return decode_body(path, bytes.clone()).map(|body| RawResponse { status: 200, body });
        }
        if *method != Method::GET {
            return Ok(self.responses.get(path).cloned().unwrap_or(RawResponse {
                status: 202,
                body: String::new(),
            }));
        }
        Ok(self.responses.get(path).cloned().unwrap_or(RawResponse {
            status: 404,
            body: "Not Found".to_string(),
        }))
    }
}
