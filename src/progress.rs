use indicatif::{ProgressBar, ProgressStyle};

use crate::models::{DownloadProgress, JobProgress, UploadProgress};

const TRANSFER_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}";
const JOB_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}";

fn styled(len: u64, template: &str) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    let pb = ProgressBar::new(len);
    pb.set_style(style);
    pb
}

/// Byte-count bar for uploads.
pub fn upload_bar(total_bytes: u64, file_name: &str) -> ProgressBar {
    let pb = styled(total_bytes, TRANSFER_TEMPLATE);
    pb.set_message(format!("Uploading {}", file_name));
    pb
}

pub fn update_upload(pb: &ProgressBar, progress: &UploadProgress) {
    pb.set_length(progress.total_bytes.max(progress.bytes_sent));
    pb.set_position(progress.bytes_sent);
}

/// Percent bar for encode jobs; the message carries the job state.
pub fn job_bar(label: &str) -> ProgressBar {
    let pb = styled(100, JOB_TEMPLATE);
    pb.set_message(label.to_string());
    pb
}

pub fn update_job(pb: &ProgressBar, label: &str, progress: &JobProgress) {
    pb.set_position(progress.percent.clamp(0.0, 100.0).round() as u64);
    pb.set_message(format!("{} ({})", label, progress.state));
}

/// Byte-count bar for downloads of unknown size.
pub fn download_bar() -> ProgressBar {
    styled(0, TRANSFER_TEMPLATE)
}

pub fn update_download(pb: &ProgressBar, progress: &DownloadProgress) {
    pb.set_message(format!(
        "{} ({}/{})",
        progress.file_name,
        progress.file_index + 1,
        progress.file_count
    ));
    if pb.length().unwrap_or(0) < progress.bytes_written {
        pb.set_length(progress.bytes_written);
    }
    pb.set_position(progress.bytes_written);
}

/// Storage size in decimal megabytes with two decimals.
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1000.0 / 1000.0)
}
