//! .NET build strategy: restore, then publish into the output directory.

use std::path::Path;

use crate::error::{BuildFailure, HoistResult};

use super::runner::ToolRunner;
use super::{map_tool_error, project_file_stem};

/// Planned commands, for `--dry-run`.
pub fn plan(publish_dir: &Path, self_contained: bool) -> Vec<String> {
    let mode = if self_contained {
        "--self-contained true"
    } else {
        "--no-self-contained"
    };
    vec![
        "dotnet restore".to_string(),
        format!(
            "dotnet publish -c Release -o {} {}",
            publish_dir.display(),
            mode
        ),
    ]
}

/// Restore and publish. Returns the startup command for the hosting
/// manifest, derived from the project file name.
pub fn build(
    runner: &dyn ToolRunner,
    project_path: &Path,
    publish_dir: &Path,
    self_contained: bool,
) -> HoistResult<Option<String>> {
    runner
        .run("dotnet", &["restore"], project_path)
        .map_err(|e| map_tool_error(e, BuildFailure::Restore, "dotnet restore"))?;

    let out = publish_dir.display().to_string();
    let mut args = vec!["publish", "-c", "Release", "-o", out.as_str()];
    if self_contained {
        args.extend(["--self-contained", "true"]);
    } else {
        args.push("--no-self-contained");
    }
    runner
        .run("dotnet", &args, project_path)
        .map_err(|e| map_tool_error(e, BuildFailure::Compile, "dotnet publish"))?;

    let startup = project_file_stem(project_path, &["csproj", "fsproj", "vbproj"])
        .map(|stem| format!("dotnet {stem}.dll"));
    Ok(startup)
}
