//! Modelfile rendering.
//!
//! A model directory holds base weights and, optionally, a LoRA adapter
//! (any file whose name contains `lora`). The Modelfile references both by
//! their path as seen from the model server's own filesystem.

const ADAPTER_MARKER: &str = "lora";

/// Render a Modelfile for the files of one model directory.
///
/// `server_dir` is the directory as mounted on the model server, e.g.
/// `/home/llama3`. Files are considered in sorted order. Returns `None` when
/// there are no base weights to build from.
pub fn render_modelfile<S: AsRef<str>>(files: &[S], server_dir: &str) -> Option<String> {
    let mut names: Vec<&str> = files.iter().map(AsRef::as_ref).collect();
    names.sort_unstable();

    let base = names.iter().find(|name| !name.contains(ADAPTER_MARKER))?;
    let adapter = names.iter().find(|name| name.contains(ADAPTER_MARKER));

    let dir = server_dir.trim_end_matches('/');
    let mut modelfile = format!("FROM {dir}/{base}");
    if let Some(adapter) = adapter {
        modelfile.push_str(&format!("\nADAPTER {dir}/{adapter}"));
    }
    Some(modelfile)
}
