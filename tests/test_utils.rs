use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Run git in `dir`, panicking loudly on failure so fixture problems are
/// obvious, and return trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "bisectkit test")
        .env("GIT_AUTHOR_EMAIL", "bisectkit@example.org")
        .env("GIT_COMMITTER_NAME", "bisectkit test")
        .env("GIT_COMMITTER_EMAIL", "bisectkit@example.org")
        .args(args)
        .output()
        .expect("failed to run git");

    assert!(
        output.status.success(),
        "git {:?} failed in {:?}:\n{}",
        args,
        dir,
        String::from_utf8_lossy(&output.stderr)
    );

    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A throwaway git repository whose commits carry a metric value in
/// `value.txt`, standing in for a source tree whose performance changes
/// over its history.
pub struct PerfRepo {
    pub dir: PathBuf,
}

impl PerfRepo {
    pub fn init(dir: &Path) -> Self {
        fs::create_dir_all(dir).expect("failed to create repo dir");
        git(dir, &["init", "--quiet"]);
        // The sync tooling expects the master branch regardless of the
        // host's init.defaultBranch
        git(dir, &["symbolic-ref", "HEAD", "refs/heads/master"]);

        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Commit a set of files and return the new commit's hash
    pub fn commit(&self, message: &str, files: &[(&str, &str)]) -> String {
        for (name, contents) in files {
            let path = self.dir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("failed to create file dir");
            }
            fs::write(&path, contents).expect("failed to write file");
        }

        git(&self.dir, &["add", "-A"]);
        // --allow-empty so consecutive commits with the same value.txt still
        // produce distinct revisions (the fixtures intentionally repeat values)
        git(&self.dir, &["commit", "--quiet", "--allow-empty", "-m", message]);
        git(&self.dir, &["rev-parse", "HEAD"])
    }

    /// Commit a metric value (plus any extra files)
    pub fn commit_value(&self, value: f64, extra: &[(&str, &str)]) -> String {
        let value_contents = format!("{value}\n");
        let mut files = vec![("value.txt", value_contents.as_str())];
        files.extend_from_slice(extra);
        self.commit(&format!("set value to {value}"), &files)
    }
}

/// DEPS file contents pinning a webkit revision
pub fn deps_with_webkit_pin(revision: &str) -> String {
    format!(
        "vars = {{\n  'webkit_revision': '{revision}',\n}}\n\
         deps = {{\n  'src/third_party/WebKit':\n    \
         'https://example.org/webkit.git@' + Var('webkit_revision'),\n}}\n"
    )
}

/// A shell command that reports the checked-out metric value in the legacy
/// perf test output format.
pub const REPORT_VALUE_COMMAND: &str =
    "printf 'RESULT times: t= %s ms\\n' \"$(cat value.txt)\"";

/// Same, but reading the value from the webkit checkout
pub const REPORT_WEBKIT_VALUE_COMMAND: &str =
    "printf 'RESULT times: t= %s ms\\n' \"$(cat third_party/WebKit/value.txt)\"";
