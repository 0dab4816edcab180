use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress over the frames of a sequence, a spinner when the length is unknown.
pub fn frame_progress(len: Option<u64>) -> Result<ProgressBar> {
    let pb = match len {
        Some(len) => {
            let pb = ProgressBar::new(len);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "Processing [{bar:40.green/blue}] {pos}/{len} frames ({percent}%) {msg}",
                    )?
                    .progress_chars("█▉▊▋▌▍▎▏"),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner().template("Processing {spinner} {pos} frames {msg}")?,
            );
            pb
        }
    };
    Ok(pb)
}
