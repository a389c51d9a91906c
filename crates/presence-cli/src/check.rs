//! `presence check-models`: verifies the ONNX models against `SHA256SUMS`.

use anyhow::{bail, Context, Result};
use presence_models::{missing_models, read_manifest, verify_model, ModelIntegrityError, CHECKSUM_MANIFEST, MODELS};
use std::path::Path;

pub fn run(model_dir: &Path) -> Result<()> {
    println!("Model directory: {}", model_dir.display());

    let missing = missing_models(model_dir);
    for path in &missing {
        println!("  {}: missing", path.display());
    }

    let manifest_path = model_dir.join(CHECKSUM_MANIFEST);
    let manifest = match read_manifest(&manifest_path) {
        Ok(manifest) => manifest,
        Err(e) if missing.is_empty() => {
            return Err(e).with_context(|| format!("cannot use {}", manifest_path.display()));
        }
        Err(e) => bail!("{} of {} model(s) missing; {e}", missing.len(), MODELS.len()),
    };

    let mut failed = missing.len();
    for model in MODELS {
        if missing.contains(&model_dir.join(model.name)) {
            continue;
        }
        match verify_model(model_dir, model, &manifest) {
            Ok(()) => println!("  {} ({}): ok", model.name, model.purpose),
            Err(ModelIntegrityError::Unlisted { .. }) => {
                println!("  {} ({}): not listed in {CHECKSUM_MANIFEST}", model.name, model.purpose);
                failed += 1;
            }
            Err(e) => {
                println!("  {} ({}): {e}", model.name, model.purpose);
                failed += 1;
            }
        }
    }

    println!();
    if failed > 0 {
        bail!("{failed} of {} model(s) failed verification", MODELS.len());
    }
    println!("All {} models verified.", MODELS.len());
    Ok(())
}
