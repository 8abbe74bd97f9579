#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use cmsfeed_core::config::SourceConfig;
use cmsfeed_ingest::{SourceClient, SourceTemplates, TransportError};

/// Scripted HTTP double: per-URL HEAD statuses and GET bodies.
/// Unscripted URLs fail at the transport level; stalled URLs never answer.
#[derive(Default)]
pub struct ScriptedClient {
    heads: HashMap<String, u16>,
    gets: HashMap<String, (u16, Bytes)>,
    stalled: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_head(mut self, url: &str, status: u16) -> Self {
        self.heads.insert(url.to_string(), status);
        self
    }

    pub fn with_get(mut self, url: &str, status: u16, body: Vec<u8>) -> Self {
        self.gets.insert(url.to_string(), (status, Bytes::from(body)));
        self
    }

    /// GET on `url` hangs forever, like a download that never finishes.
    pub fn with_stalled_get(mut self, url: &str) -> Self {
        self.stalled.insert(url.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl SourceClient for ScriptedClient {
    async fn head(&self, url: &str, _timeout: Duration) -> Result<u16, TransportError> {
        self.calls.lock().unwrap().push(format!("HEAD {url}"));
        self.heads
            .get(url)
            .copied()
            .ok_or_else(|| TransportError::new(url, "connection refused"))
    }

    async fn get(&self, url: &str) -> Result<(u16, Bytes), TransportError> {
        self.calls.lock().unwrap().push(format!("GET {url}"));
        if self.stalled.contains(url) {
            std::future::pending::<()>().await;
        }
        self.gets
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::new(url, "connection refused"))
    }
}

pub fn templates() -> SourceTemplates {
    SourceTemplates::from_config(&SourceConfig::default()).unwrap()
}

/// A zip holding the given (name, contents) members.
pub fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub const ENROLLMENT_CSV: &str = "\
State,County,Contract ID,Organization Name,Enrolled
AL,Autauga,H0104,Blue Cross,120
AL,Baldwin,H0104,Blue Cross,95
AK,Anchorage,H0201,Aetna,33
";
