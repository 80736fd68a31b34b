// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gearman_lowlevel::{Job, JobResponse, ReturnCode};
use log::warn;

use crate::error::{BridgeError, Result};
use crate::handles::{HandleObject, HandleType, Teardown};

pub enum JobSource {
    /// A job a worker thread fetched and handed to a host function.
    Fetched(Arc<dyn Job>),
    /// A job submitted with `client_do_background`; only its handle is known.
    Background { job_handle: String },
}

/// Host view of a job, addressed through a `GearmanJob` handle.
pub struct JobContext {
    source: JobSource,
    deferred: AtomicBool,
}

impl JobContext {
    pub fn fetched(job: Arc<dyn Job>) -> Arc<Self> {
        Arc::new(Self {
            source: JobSource::Fetched(job),
            deferred: AtomicBool::new(false),
        })
    }

    pub fn background(job_handle: String) -> Arc<Self> {
        Arc::new(Self {
            source: JobSource::Background { job_handle },
            deferred: AtomicBool::new(false),
        })
    }

    pub fn source(&self) -> &JobSource {
        &self.source
    }

    fn job(&self) -> Result<&Arc<dyn Job>> {
        match &self.source {
            JobSource::Fetched(job) => Ok(job),
            JobSource::Background { job_handle } => Err(BridgeError::InvalidArgument(format!(
                "background job {} cannot send packets",
                job_handle
            ))),
        }
    }

    pub fn send(&self, data: &[u8], kind: JobResponse) -> Result<ReturnCode> {
        let job = self.job()?;
        Ok(match kind {
            JobResponse::Data => job.send_data(data),
            JobResponse::Warning => job.send_warning(data),
            JobResponse::Complete => job.send_complete(data),
            JobResponse::Exception => job.send_exception(data),
        })
    }

    pub fn send_fail(&self) -> Result<ReturnCode> {
        Ok(self.job()?.send_fail())
    }

    pub fn send_status(&self, numerator: u32, denominator: u32) -> Result<ReturnCode> {
        Ok(self.job()?.send_status(numerator, denominator))
    }

    pub fn function_name(&self) -> Option<&str> {
        match &self.source {
            JobSource::Fetched(job) => Some(job.function_name()),
            JobSource::Background { .. } => None,
        }
    }

    pub fn unique(&self) -> Option<&str> {
        match &self.source {
            JobSource::Fetched(job) => Some(job.unique()),
            JobSource::Background { .. } => None,
        }
    }

    pub fn workload(&self) -> Option<&[u8]> {
        match &self.source {
            JobSource::Fetched(job) => Some(job.workload()),
            JobSource::Background { .. } => None,
        }
    }

    pub fn workload_size(&self) -> usize {
        self.workload().map_or(0, <[u8]>::len)
    }

    pub fn job_handle(&self) -> &str {
        match &self.source {
            JobSource::Fetched(job) => job.handle(),
            JobSource::Background { job_handle } => job_handle,
        }
    }

    /// Marks the job as left open by its worker function; the host finishes it.
    pub(crate) fn defer(&self) {
        self.deferred.store(true, Ordering::Release);
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::Acquire)
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            JobSource::Fetched(_) => "fetched",
            JobSource::Background { .. } => "background",
        };
        f.debug_struct("JobContext")
            .field("kind", &kind)
            .field("job_handle", &self.job_handle())
            .field("deferred", &self.is_deferred())
            .finish()
    }
}

impl HandleObject for JobContext {
    const TYPE: HandleType = HandleType::Job;
}

impl Teardown for JobContext {
    fn on_handle_destroy(&self) {
        if let JobSource::Fetched(job) = &self.source {
            if self.is_deferred() && !job.is_finished() {
                warn!("job {} closed without a result, failing it", job.handle());
                job.send_fail();
            }
        }
    }
}
