//! ImageMagick invocations: HEIC/HEIF to JPEG conversion and thumbnail
//! rendering for formats the `image` crate cannot decode.

use std::path::Path;
use std::time::Duration;

use dc_core::{ConversionContext, Result};

use crate::command::ToolCommand;

/// Convert `input` to `output`; ImageMagick picks formats from extensions.
///
/// The command is killed if the job is cancelled. ImageMagick gives no
/// progress, so the job sits at 0% until it finishes.
pub async fn convert(program: &Path, input: &Path, output: &Path, ctx: &ConversionContext) -> Result<()> {
    ctx.checkpoint()?;
    ToolCommand::new(program.to_path_buf())
        .arg(input.to_string_lossy())
        .arg(output.to_string_lossy())
        .cancellation(ctx.cancellation.clone())
        .execute()
        .await?;
    ctx.progress.send(1.0, None);
    Ok(())
}

/// Arguments rendering the first frame of `input` as a JPEG on stdout,
/// fitted into a `size`x`size` box.
pub fn thumbnail_args(input: &Path, size: u32) -> Vec<String> {
    vec![
        format!("{}[0]", input.to_string_lossy()),
        "-resize".into(),
        format!("{size}x{size}"),
        "-quality".into(),
        "80".into(),
        "jpeg:-".into(),
    ]
}

/// Render a JPEG thumbnail via ImageMagick and return its bytes.
pub async fn thumbnail(program: &Path, input: &Path, size: u32, timeout: Duration) -> Result<Vec<u8>> {
    let output = ToolCommand::new(program.to_path_buf())
        .args(thumbnail_args(input, size))
        .timeout(timeout)
        .execute()
        .await?;
    Ok(output.stdout)
}
