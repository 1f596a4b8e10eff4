mod client;
mod events;
mod policy;
mod process;
mod script;
mod tail;

pub use client::{drive_upgrade, DatabaseProbe, EnterpriseClient, EnterpriseOptions};
pub use events::{classify_line, LineEvent, PromptResponder};
pub use policy::{classify_exit, AttemptVerdict, EnterpriseUpgradeError, RetryPolicy};
pub use process::{ChildUpgradeProcess, ProcessExit, ScriptLauncher, UpgradeLauncher, UpgradeProcess};
pub use script::{
    download_upgrade_script, patch_upgrade_script, sha256_hex, write_upgrade_script, ScriptPatch,
    SshTrust, UPGRADE_SCRIPT_URL,
};
pub use tail::{LineSource, LogTail};
