use std::{
    collections::BTreeMap,
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::tuya::Credentials;

/// Namespace every credential is stored under.
pub const NAMESPACE: &str = "Tuya";

const ACCESS_ID: &str = "access_id";
const ACCESS_SECRET: &str = "secret";
const DEVICE_ID: &str = "device_id";

/// A persistent key-value store for secrets, addressed by namespace + field.
pub trait SecretStore {
    fn get(&self, namespace: &str, field: &str) -> Result<Option<String>>;
    fn set(&self, namespace: &str, field: &str, value: &str) -> Result<()>;
}

/// Asks the operator for a value that is neither configured nor stored.
///
/// `hidden` answers must not be echoed back to the terminal.
pub trait Prompter {
    fn prompt(&self, field: &str, label: &str, hidden: bool) -> Result<String>;
}

/// Values from the environment that take precedence over the store.
#[derive(Debug, Clone, Default)]
pub struct CredentialOverrides {
    pub access_id: Option<String>,
    pub access_secret: Option<String>,
    pub device_id: Option<String>,
}

/// Resolve each credential: override → store → prompt (and persist).
///
/// Runs once at startup; the returned value is immutable for the process.
pub fn load_credentials<S, P>(
    overrides: &CredentialOverrides,
    store: &S,
    prompter: &P,
) -> Result<Credentials>
where
    S: SecretStore,
    P: Prompter,
{
    Ok(Credentials {
        access_id: resolve(
            overrides.access_id.as_deref(),
            ACCESS_ID,
            "Please enter access id",
            false,
            store,
            prompter,
        )?,
        access_secret: resolve(
            overrides.access_secret.as_deref(),
            ACCESS_SECRET,
            "Please enter access key (secret)",
            true,
            store,
            prompter,
        )?,
        device_id: resolve(
            overrides.device_id.as_deref(),
            DEVICE_ID,
            "Please enter device id",
            false,
            store,
            prompter,
        )?,
    })
}

fn resolve<S: SecretStore, P: Prompter>(
    overridden: Option<&str>,
    field: &str,
    label: &str,
    hidden: bool,
    store: &S,
    prompter: &P,
) -> Result<String> {
    if let Some(value) = overridden.filter(|v| !v.is_empty()) {
        return Ok(value.to_owned());
    }

    if let Some(value) = store
        .get(NAMESPACE, field)
        .with_context(|| format!("Failed to read secret {NAMESPACE}/{field}"))?
        .filter(|v| !v.is_empty())
    {
        return Ok(value);
    }

    let value = prompter.prompt(field, label, hidden)?.trim().to_owned();
    if value.is_empty() {
        bail!("no value entered for {NAMESPACE}/{field}");
    }
    store
        .set(NAMESPACE, field, &value)
        .with_context(|| format!("Failed to persist secret {NAMESPACE}/{field}"))?;
    info!(field, "Stored new secret");
    Ok(value)
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

type Document = BTreeMap<String, BTreeMap<String, String>>;

/// Secrets kept as `{namespace: {field: value}}` in a JSON file that only
/// the owner can read.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Document> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(Document::new()),
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Malformed secrets file {}", self.path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Document::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    fn save(&self, doc: &Document) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_vec_pretty(doc)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        restrict_permissions(&self.path)
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, namespace: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .load()?
            .get(namespace)
            .and_then(|fields| fields.get(field))
            .cloned())
    }

    fn set(&self, namespace: &str, field: &str, value: &str) -> Result<()> {
        let mut doc = self.load()?;
        doc.entry(namespace.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
        self.save(&doc)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict permissions of {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Reads answers from the terminal, one line per prompt. Hidden answers are
/// read without echo.
#[derive(Debug, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt(&self, field: &str, label: &str, hidden: bool) -> Result<String> {
        if hidden {
            return rpassword::prompt_password(format!("{label}: "))
                .with_context(|| format!("Failed to read {field} from the terminal"));
        }

        let mut stderr = io::stderr();
        write!(stderr, "{label}: ")?;
        stderr.flush()?;

        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        if read == 0 {
            bail!("stdin closed while waiting for input");
        }
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CannedPrompter, MemorySecretStore};

    #[test]
    fn stored_values_are_used_without_prompting() {
        let store = MemorySecretStore::with(&[
            ("Tuya", "access_id", "id"),
            ("Tuya", "secret", "sec"),
            ("Tuya", "device_id", "dev"),
        ]);
        let prompter = CannedPrompter::default();

        let creds = load_credentials(&CredentialOverrides::default(), &store, &prompter).unwrap();
        assert_eq!(creds.access_id, "id");
        assert_eq!(creds.access_secret, "sec");
        assert_eq!(creds.device_id, "dev");
        assert!(prompter.asked().is_empty());
    }

    #[test]
    fn missing_values_are_prompted_and_persisted() {
        let store = MemorySecretStore::with(&[("Tuya", "access_id", "id")]);
        let prompter = CannedPrompter::with(&[("secret", " s3cr3t \n"), ("device_id", "dev\n")]);

        let creds = load_credentials(&CredentialOverrides::default(), &store, &prompter).unwrap();
        assert_eq!(creds.access_secret, "s3cr3t");
        assert_eq!(creds.device_id, "dev");
        assert_eq!(prompter.asked(), ["secret", "device_id"]);
        assert_eq!(prompter.asked_hidden(), ["secret"]);
        assert_eq!(store.value("Tuya", "secret").as_deref(), Some("s3cr3t"));
        assert_eq!(store.value("Tuya", "device_id").as_deref(), Some("dev"));
    }

    #[test]
    fn overrides_win_over_store_and_are_not_persisted() {
        let store = MemorySecretStore::with(&[
            ("Tuya", "access_id", "stored"),
            ("Tuya", "secret", "sec"),
            ("Tuya", "device_id", "dev"),
        ]);
        let overrides = CredentialOverrides {
            access_id: Some("from-env".to_owned()),
            ..CredentialOverrides::default()
        };

        let creds = load_credentials(&overrides, &store, &CannedPrompter::default()).unwrap();
        assert_eq!(creds.access_id, "from-env");
        assert_eq!(store.value("Tuya", "access_id").as_deref(), Some("stored"));
    }

    #[test]
    fn empty_stored_value_counts_as_missing() {
        let store = MemorySecretStore::with(&[
            ("Tuya", "access_id", "id"),
            ("Tuya", "secret", ""),
            ("Tuya", "device_id", "dev"),
        ]);
        let prompter = CannedPrompter::with(&[("secret", "fresh")]);

        let creds = load_credentials(&CredentialOverrides::default(), &store, &prompter).unwrap();
        assert_eq!(creds.access_secret, "fresh");
    }

    #[test]
    fn only_the_secret_is_prompted_without_echo() {
        let store = MemorySecretStore::default();
        let prompter = CannedPrompter::with(&[
            ("access_id", "id"),
            ("secret", "sec"),
            ("device_id", "dev"),
        ]);

        load_credentials(&CredentialOverrides::default(), &store, &prompter).unwrap();
        assert_eq!(prompter.asked(), ["access_id", "secret", "device_id"]);
        assert_eq!(prompter.asked_hidden(), ["secret"]);
    }

    #[test]
    fn blank_answer_is_an_error() {
        let store = MemorySecretStore::default();
        let prompter = CannedPrompter::with(&[("access_id", "   \n")]);
        let err = load_credentials(&CredentialOverrides::default(), &store, &prompter).unwrap_err();
        assert!(err.to_string().contains("Tuya/access_id"));
    }

    #[test]
    fn file_store_round_trips_and_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("cfg/secrets.json"));

        assert_eq!(store.get("Tuya", "secret").unwrap(), None);
        store.set("Tuya", "secret", "abc").unwrap();
        store.set("Tuya", "device_id", "dev").unwrap();

        let reopened = FileSecretStore::new(dir.path().join("cfg/secrets.json"));
        assert_eq!(reopened.get("Tuya", "secret").unwrap().as_deref(), Some("abc"));
        assert_eq!(reopened.get("Tuya", "device_id").unwrap().as_deref(), Some("dev"));
        assert_eq!(reopened.get("Other", "secret").unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        FileSecretStore::new(&path).set("Tuya", "secret", "abc").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        fs::write(&path, "not json").unwrap();

        let err = FileSecretStore::new(&path).get("Tuya", "secret").unwrap_err();
        assert!(err.to_string().contains("Malformed secrets file"));
    }
}
