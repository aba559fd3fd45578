//! Test doubles shared by the unit tests.

use crate::adapter::{Adapter, ScanRequest};
use crate::error::AdapterError;
use crate::status::{StatusReport, StatusSink};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    BeginScan(ScanRequest),
    EndScan,
}

/// Adapter that records every call; `fail_begin` makes `begin_scan` error.
#[derive(Clone, Default)]
pub struct MockAdapter {
    calls: Arc<Mutex<Vec<AdapterCall>>>,
    fail_begin: Arc<Mutex<bool>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_fail_begin(&self, fail: bool) {
        *self.fail_begin.lock().unwrap() = fail;
    }
}

impl Adapter for MockAdapter {
    fn begin_scan(&mut self, request: &ScanRequest) -> Result<(), AdapterError> {
        if *self.fail_begin.lock().unwrap() {
            return Err(AdapterError::ScanFailed("mock failure".to_string()));
        }
        self.calls
            .lock()
            .unwrap()
            .push(AdapterCall::BeginScan(request.clone()));
        Ok(())
    }

    fn end_scan(&mut self) -> Result<(), AdapterError> {
        self.calls.lock().unwrap().push(AdapterCall::EndScan);
        Ok(())
    }
}

/// Sink that keeps every report it receives.
pub struct RecordingSink {
    reports: Arc<Mutex<Vec<StatusReport>>>,
}

impl RecordingSink {
    pub fn new() -> (Self, Arc<Mutex<Vec<StatusReport>>>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                reports: reports.clone(),
            },
            reports,
        )
    }
}

impl StatusSink for RecordingSink {
    fn emit(&mut self, report: &StatusReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}
