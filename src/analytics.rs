//! Downloads analytics events.
//!
//! The engine reports learner actions through [`DownloadsAnalytics`]; where the
//! events go is up to the host. [`TracingAnalytics`] writes them to the log.

use std::fmt;

/// Parameter key carrying an event's BI value.
pub const NAME_KEY: &str = "name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyticsEvent {
    DownloadCourseClicked,
    CancelDownloadClicked,
    RemoveDownloadClicked,
    DownloadConfirmed,
    /// A download dialog was dismissed.
    DownloadCancelled,
    DownloadRemoved,
    DownloadError,
    DownloadCompleted,
    DownloadStarted,
}

impl AnalyticsEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            AnalyticsEvent::DownloadCourseClicked => "Downloads:Download Course Clicked",
            AnalyticsEvent::CancelDownloadClicked => "Downloads:Cancel Download Clicked",
            AnalyticsEvent::RemoveDownloadClicked => "Downloads:Remove Download Clicked",
            AnalyticsEvent::DownloadConfirmed => "Downloads:Download Confirmed",
            AnalyticsEvent::DownloadCancelled => "Downloads:Download Cancelled",
            AnalyticsEvent::DownloadRemoved => "Downloads:Download Removed",
            AnalyticsEvent::DownloadError => "Downloads:Download Error",
            AnalyticsEvent::DownloadCompleted => "Downloads:Download Completed",
            AnalyticsEvent::DownloadStarted => "Downloads:Download Started",
        }
    }

    pub fn bi_value(&self) -> &'static str {
        match self {
            AnalyticsEvent::DownloadCourseClicked => "edx.bi.app.downloads.downloadCourseClicked",
            AnalyticsEvent::CancelDownloadClicked => "edx.bi.app.downloads.cancelDownloadClicked",
            AnalyticsEvent::RemoveDownloadClicked => "edx.bi.app.downloads.removeDownloadClicked",
            AnalyticsEvent::DownloadConfirmed => "edx.bi.app.downloads.downloadConfirmed",
            AnalyticsEvent::DownloadCancelled => "edx.bi.app.downloads.downloadCancelled",
            AnalyticsEvent::DownloadRemoved => "edx.bi.app.downloads.downloadRemoved",
            AnalyticsEvent::DownloadError => "edx.bi.app.downloads.downloadError",
            AnalyticsEvent::DownloadCompleted => "edx.bi.app.downloads.downloadCompleted",
            AnalyticsEvent::DownloadStarted => "edx.bi.app.downloads.downloadStarted",
        }
    }

    /// Event parameters as sent to the analytics backend.
    pub fn params(&self) -> [(&'static str, &'static str); 1] {
        [(NAME_KEY, self.bi_value())]
    }
}

impl fmt::Display for AnalyticsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Sink for downloads analytics.
pub trait DownloadsAnalytics: Send + Sync {
    fn log_event(&self, event: AnalyticsEvent);
}

/// Logs analytics events at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAnalytics;

impl DownloadsAnalytics for TracingAnalytics {
    fn log_event(&self, event: AnalyticsEvent) {
        tracing::debug!("Analytics: {} ({}={})", event, NAME_KEY, event.bi_value());
    }
}
