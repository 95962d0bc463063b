use std::fmt::Write as _;
use std::path::Path;

use super::{DependencyMode, Recipe};

const STAGING: &str = "/tmp/hp";

/// Renders the container build recipe equivalent to `recipe`.
pub fn render_dockerfile(recipe: &Recipe) -> String {
    let mut out = String::new();
    out.push_str("# Rendered by hp from hp.toml. Do not edit by hand.\n");
    let _ = writeln!(out, "FROM {}", recipe.image.base.trim());
    out.push('\n');

    if !recipe.base.update.is_empty() {
        let _ = writeln!(
            out,
            "RUN export DEBIAN_FRONTEND=noninteractive \\\n    && {}",
            recipe.base.update.join(" \\\n    && ")
        );
        out.push('\n');
    }

    let deps = &recipe.dependencies;
    let lock_name = file_name(&deps.lock);
    match deps.mode {
        DependencyMode::Pinned => {
            let _ = writeln!(
                out,
                "COPY {} {STAGING}/{lock_name}",
                context_path(&deps.lock)
            );
            let _ = writeln!(
                out,
                "RUN pip install --no-cache-dir -r {STAGING}/{lock_name}"
            );
        }
        DependencyMode::Compile => {
            let input_name = file_name(&deps.input);
            let hashes = if deps.generate_hashes {
                " --generate-hashes"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "COPY {} {STAGING}/{input_name}",
                context_path(&deps.input)
            );
            let _ = writeln!(
                out,
                "RUN pip install --no-cache-dir pip-tools \\\n    \
                 && pip-compile --quiet{hashes} --output-file {STAGING}/{lock_name} {STAGING}/{input_name} \\\n    \
                 && pip-sync {STAGING}/{lock_name}"
            );
        }
    }
    out.push('\n');

    let _ = writeln!(
        out,
        "COPY {} {}",
        context_path(&recipe.payload.source),
        recipe.workdir()
    );
    let _ = writeln!(out, "WORKDIR {}", recipe.workdir());
    let command = serde_json::to_string(&recipe.entrypoint_command())
        .unwrap_or_else(|_| String::from("[]"));
    let _ = writeln!(out, "CMD {command}");
    out
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn context_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_pinned_recipe() {
        let mut recipe = Recipe::default();
        recipe.dependencies.mode = DependencyMode::Pinned;
        let rendered = render_dockerfile(&recipe);
        let expected = "\
# Rendered by hp from hp.toml. Do not edit by hand.
FROM python:3.11-slim

RUN export DEBIAN_FRONTEND=noninteractive \\
    && apt-get update \\
    && apt-get -y upgrade

COPY requirements.txt /tmp/hp/requirements.txt
RUN pip install --no-cache-dir -r /tmp/hp/requirements.txt

COPY app /app
WORKDIR /app
CMD [\"python\",\"-m\",\"restful.server\"]
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn renders_compile_then_sync_recipe() {
        let mut recipe = Recipe::default();
        recipe.dependencies.generate_hashes = true;
        recipe.entrypoint.args = vec!["--port".into(), "8080".into()];
        let rendered = render_dockerfile(&recipe);
        assert!(rendered.contains("COPY requirements.in /tmp/hp/requirements.in\n"));
        assert!(rendered.contains(
            "&& pip-compile --quiet --generate-hashes --output-file /tmp/hp/requirements.txt /tmp/hp/requirements.in"
        ));
        assert!(rendered.contains("&& pip-sync /tmp/hp/requirements.txt\n"));
        assert!(rendered.ends_with(
            "WORKDIR /app\nCMD [\"python\",\"-m\",\"restful.server\",\"--port\",\"8080\"]\n"
        ));
        let payload = rendered.find("COPY app /app").expect("payload copy");
        let deps = rendered.find("pip-sync").expect("dependency stage");
        assert!(deps < payload);
    }
}
