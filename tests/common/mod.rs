#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use phototrail::config::AppConfig;
use phototrail::models::UploadedFile;
use phototrail::workflow::BatchCoordinator;
use tempfile::TempDir;
use uuid::Uuid;

/// Copies its input into the output directory and reports it. Filenames
/// containing `fail` exit 1; filenames containing `slow` take a second.
pub const FILE_WORKER: &str = r#"
in="$1"; out="$2"; token="$3"; name="$4"
case "$name" in
  *fail*) echo "cannot decode $name" >&2; exit 1 ;;
  *slow*) sleep 1 ;;
esac
dest="$out/$token-$name"
cp "$in" "$dest" || exit 2
printf '{"derivedPath":"%s","captureTime":"2024:05:01 10:00:00","location":{"latitude":25.03,"longitude":121.56}}\n' "$dest"
"#;

/// One record per `derivedPath` on stdin, or at most `$1` records.
pub const ENRICHMENT_WORKER: &str = r#"
payload=$(cat)
n=$(printf '%s' "$payload" | grep -o '"derivedPath"' | wc -l)
n=$((n + 0))
if [ -n "$1" ] && [ "$1" -lt "$n" ]; then n=$1; fi
printf '['
i=0
while [ $i -lt $n ]; do
  if [ $i -gt 0 ]; then printf ','; fi
  printf '{"analysis":{"index":%d},"effects":{"sound":"/assets/sounds/%d.mp3","stamp":"/assets/stamps/%d.png"}}' $i $i $i
  i=$((i + 1))
done
printf ']\n'
"#;

pub const FAILING_ENRICHMENT_WORKER: &str = r#"
cat >/dev/null
echo "enrichment service unavailable" >&2
exit 3
"#;

/// Exits 0 without saying where the output went.
pub const SILENT_FILE_WORKER: &str = r#"
echo '{}'
"#;

/// Claims a derived file outside the output directory.
pub const FOREIGN_FILE_WORKER: &str = r#"
printf '{"derivedPath":"%s"}\n' "$1"
"#;

pub struct Sandbox {
    pub root: TempDir,
    pub config: AppConfig,
}

impl Sandbox {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let mut config = AppConfig {
            upload_dir: root.path().join("uploads"),
            derived_dir: root.path().join("public/results/images"),
            records_dir: root.path().join("results"),
            worker_timeout_secs: 20,
            ..AppConfig::default()
        };
        fs::create_dir_all(&config.upload_dir).unwrap();

        let sandbox_root = root.path().to_path_buf();
        config.file_worker_program = "sh".to_string();
        config.file_worker_args = vec![write_script(&sandbox_root, "file_worker.sh", FILE_WORKER)];
        config.enrichment_worker_program = "sh".to_string();
        config.enrichment_worker_args =
            vec![write_script(&sandbox_root, "enrichment_worker.sh", ENRICHMENT_WORKER)];

        Self { root, config }
    }

    pub fn use_file_worker(&mut self, body: &str) {
        self.config.file_worker_args = vec![self.script("custom_file_worker.sh", body)];
    }

    pub fn use_enrichment_worker(&mut self, body: &str, extra_args: &[&str]) {
        let mut args = vec![self.script("custom_enrichment_worker.sh", body)];
        args.extend(extra_args.iter().map(|arg| arg.to_string()));
        self.config.enrichment_worker_args = args;
    }

    pub fn script(&self, name: &str, body: &str) -> String {
        write_script(self.root.path(), name, body)
    }

    pub fn coordinator(&self) -> BatchCoordinator {
        BatchCoordinator::from_config(&self.config)
    }

    /// A temp upload the way the HTTP layer creates one.
    pub fn upload(&self, original_name: &str) -> UploadedFile {
        let path = self
            .config
            .upload_dir
            .join(format!("{}.upload", Uuid::new_v4()));
        fs::write(&path, format!("image bytes of {}", original_name)).unwrap();
        UploadedFile::new(original_name, path)
    }

    pub fn uploads(&self, names: &[&str]) -> Vec<UploadedFile> {
        names.iter().map(|name| self.upload(name)).collect()
    }

    pub fn pending_uploads(&self) -> Vec<PathBuf> {
        files_in(&self.config.upload_dir)
    }

    pub fn derived_files(&self) -> Vec<PathBuf> {
        files_in(&self.config.derived_dir)
    }

    pub fn record_files(&self) -> Vec<PathBuf> {
        files_in(&self.config.records_dir)
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

/// Regular files directly inside `dir`; a missing directory is empty.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}
