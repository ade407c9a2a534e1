//! Turning stage requests into mount options.
//!
//! Credentials reach `NodeStageVolume` as loosely-keyed secrets and are
//! rendered differently per host: Linux `mount.cifs` takes a single
//! `username=..,password=..` option (unless a Kerberos cache is used), while
//! Windows SMB mappings take a qualified user name and a password as separate
//! arguments.  [`CredentialOptions`] picks the convention once, from the
//! configured [`Platform`], so the stage logic stays platform-agnostic.

use std::collections::HashMap;

use crate::config::Platform;
use crate::types::Secrets;

pub const SOURCE_FIELD: &str = "source";
pub const SUBDIR_FIELD: &str = "subdir";
pub const USERNAME_FIELD: &str = "username";
pub const PASSWORD_FIELD: &str = "password";
pub const DOMAIN_FIELD: &str = "domain";

pub const PVC_NAMESPACE_KEY: &str = "csi.storage.k8s.io/pvc/namespace";
pub const PVC_NAME_KEY: &str = "csi.storage.k8s.io/pvc/name";
pub const PV_NAME_KEY: &str = "csi.storage.k8s.io/pv/name";

pub const PVC_NAMESPACE_METADATA: &str = "${pvc.metadata.namespace}";
pub const PVC_NAME_METADATA: &str = "${pvc.metadata.name}";
pub const PV_NAME_METADATA: &str = "${pv.metadata.name}";

/// Where to mount from, extracted from the volume context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareSource {
    /// Share root, e.g. `//server/share`.  Empty if absent.
    pub source: String,
    /// Optional sub-directory, possibly containing metadata placeholders.
    pub sub_dir: Option<String>,
    /// Placeholder token → replacement value.
    pub replacements: HashMap<&'static str, String>,
}

impl ShareSource {
    /// Read `source`, `subdir` and the PV/PVC metadata keys, matching keys
    /// case-insensitively.
    pub fn from_context(context: &HashMap<String, String>) -> Self {
        let mut out = Self::default();
        for (key, value) in context {
            match key.to_lowercase().as_str() {
                SOURCE_FIELD => out.source = value.clone(),
                SUBDIR_FIELD => out.sub_dir = Some(value.clone()),
                PVC_NAMESPACE_KEY => {
                    out.replacements.insert(PVC_NAMESPACE_METADATA, value.clone());
                }
                PVC_NAME_KEY => {
                    out.replacements.insert(PVC_NAME_METADATA, value.clone());
                }
                PV_NAME_KEY => {
                    out.replacements.insert(PV_NAME_METADATA, value.clone());
                }
                _ => {}
            }
        }
        out
    }

    /// The effective mount source: the share root with the substituted
    /// sub-directory appended.
    pub fn effective_source(&self) -> String {
        match self.sub_dir.as_deref().filter(|s| !s.is_empty()) {
            Some(sub_dir) => {
                let sub_dir = replace_placeholders(sub_dir, &self.replacements);
                format!("{}/{}", self.source.trim_end_matches('/'), sub_dir)
            }
            None => self.source.clone(),
        }
    }
}

/// Replace every placeholder token in `input` with its value.
pub fn replace_placeholders(input: &str, replacements: &HashMap<&'static str, String>) -> String {
    replacements
        .iter()
        .filter(|(token, _)| !token.is_empty())
        .fold(input.to_owned(), |acc, (token, value)| acc.replace(token, value))
}

/// Username, password and domain from the request secrets.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub domain: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<masked>")
            .field("domain", &self.domain)
            .finish()
    }
}

impl Credentials {
    /// Keys are matched case-insensitively; values are whitespace-trimmed.
    pub fn from_secrets(secrets: &Secrets) -> Self {
        let mut creds = Self::default();
        for (key, value) in secrets.iter() {
            match key.to_lowercase().as_str() {
                USERNAME_FIELD => creds.username = value.trim().to_owned(),
                PASSWORD_FIELD => creds.password = value.trim().to_owned(),
                DOMAIN_FIELD => creds.domain = value.trim().to_owned(),
                _ => {}
            }
        }
        creds
    }
}

/// Guest logins need no username/password options.
pub fn has_guest_mount_options(mount_flags: &[String]) -> bool {
    mount_flags.iter().any(|f| f == "guest" || f == "user=guest")
}

/// Whether the caller already set a group id among the flags.
pub fn gid_present(mount_flags: &[String]) -> bool {
    mount_flags.iter().any(|f| f.starts_with("gid"))
}

/// Options passed to the mount primitive.  `sensitive_options` must never be
/// logged.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MountOptionSet {
    pub options: Vec<String>,
    pub sensitive_options: Vec<String>,
}

impl std::fmt::Debug for MountOptionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountOptionSet")
            .field("options", &self.options)
            .field("sensitive_options", &self.sensitive_options.len())
            .finish()
    }
}

/// Everything option shaping needs to know about one stage request.
#[derive(Debug, Clone, Copy)]
pub struct OptionInputs<'a> {
    pub credentials: &'a Credentials,
    pub mount_flags: &'a [String],
    pub volume_mount_group: Option<&'a str>,
    /// A Kerberos ticket cache was installed for this mount.
    pub kerberos: bool,
}

/// Host-specific rendering of credentials into mount options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOptions {
    /// Windows: `DOMAIN\user` as an option, password as a sensitive option.
    Windows {
        /// Domain used when no `domain` secret is present.
        default_domain: String,
    },
    /// Linux `mount.cifs` conventions.
    Posix,
}

impl CredentialOptions {
    /// Select the convention for `platform`.
    pub fn for_platform(platform: Platform, default_domain: &str) -> Self {
        match platform {
            Platform::Windows => Self::Windows {
                default_domain: default_domain.to_owned(),
            },
            Platform::Posix => Self::Posix,
        }
    }

    pub fn shape(&self, inputs: OptionInputs<'_>) -> MountOptionSet {
        let creds = inputs.credentials;
        let require_credentials = !has_guest_mount_options(inputs.mount_flags);

        match self {
            Self::Windows { default_domain } => {
                if !require_credentials {
                    return MountOptionSet::default();
                }
                let domain = if creds.domain.is_empty() {
                    default_domain.as_str()
                } else {
                    creds.domain.as_str()
                };
                let username = if creds.username.contains('\\') {
                    creds.username.clone()
                } else {
                    format!("{domain}\\{}", creds.username)
                };
                MountOptionSet {
                    options: vec![username],
                    sensitive_options: vec![creds.password.clone()],
                }
            }
            Self::Posix => {
                let mut set = MountOptionSet {
                    options: inputs.mount_flags.to_vec(),
                    sensitive_options: Vec::new(),
                };
                // A ticket cache and password authentication are exclusive.
                if require_credentials && !inputs.kerberos {
                    set.sensitive_options.push(format!(
                        "{USERNAME_FIELD}={},{PASSWORD_FIELD}={}",
                        creds.username, creds.password
                    ));
                }
                if let Some(group) = inputs.volume_mount_group.filter(|g| !g.is_empty())
                    && !gid_present(inputs.mount_flags)
                {
                    set.options.push(format!("gid={group}"));
                }
                if !creds.domain.is_empty() {
                    set.options.push(format!("{DOMAIN_FIELD}={}", creds.domain));
                }
                set
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(username: &str, password: &str, domain: &str) -> Credentials {
        Credentials {
            username: username.into(),
            password: password.into(),
            domain: domain.into(),
        }
    }

    fn inputs<'a>(
        credentials: &'a Credentials,
        mount_flags: &'a [String],
        volume_mount_group: Option<&'a str>,
        kerberos: bool,
    ) -> OptionInputs<'a> {
        OptionInputs {
            credentials,
            mount_flags,
            volume_mount_group,
            kerberos,
        }
    }

    #[test]
    fn sub_path_substitution() {
        let context = HashMap::from([
            ("Source".to_owned(), "//server/share//".to_owned()),
            (
                "subDir".to_owned(),
                "${pvc.metadata.namespace}/${pvc.metadata.name}".to_owned(),
            ),
            (PVC_NAMESPACE_KEY.to_owned(), "ns1".to_owned()),
            (PVC_NAME_KEY.to_owned(), "claim1".to_owned()),
        ]);
        let share = ShareSource::from_context(&context);
        assert_eq!(share.effective_source(), "//server/share/ns1/claim1");
    }

    #[test]
    fn source_without_subdir_is_untouched() {
        let context = HashMap::from([("source".to_owned(), "//server/share/".to_owned())]);
        let share = ShareSource::from_context(&context);
        assert_eq!(share.effective_source(), "//server/share/");
    }

    #[test]
    fn pv_name_placeholder() {
        let context = HashMap::from([
            ("source".to_owned(), "//s/x".to_owned()),
            ("subdir".to_owned(), "vols/${pv.metadata.name}".to_owned()),
            (PV_NAME_KEY.to_owned(), "pv-9".to_owned()),
        ]);
        assert_eq!(
            ShareSource::from_context(&context).effective_source(),
            "//s/x/vols/pv-9"
        );
    }

    #[test]
    fn credentials_are_trimmed_and_case_insensitive() {
        let secrets = Secrets::from([("USERNAME", " u "), ("Password", "p\n"), ("domain", "CORP")]);
        assert_eq!(Credentials::from_secrets(&secrets), creds("u", "p", "CORP"));
        let printed = format!("{:?}", Credentials::from_secrets(&secrets));
        assert!(printed.contains("<masked>"));
        assert!(!printed.contains("\"p\""));
    }

    #[test]
    fn posix_password_options() {
        let c = creds("u", "p", "");
        let flags = vec!["vers=3.0".to_owned()];
        let set = CredentialOptions::Posix.shape(inputs(&c, &flags, None, false));
        assert_eq!(set.options, vec!["vers=3.0"]);
        assert_eq!(set.sensitive_options, vec!["username=u,password=p"]);
    }

    #[test]
    fn posix_kerberos_skips_password() {
        let c = creds("u", "p", "");
        let flags = vec!["sec=krb5".to_owned(), "cruid=1000".to_owned()];
        let set = CredentialOptions::Posix.shape(inputs(&c, &flags, None, true));
        assert!(set.sensitive_options.is_empty());
    }

    #[test]
    fn posix_guest_skips_password() {
        let c = creds("", "", "");
        let flags = vec!["guest".to_owned()];
        let set = CredentialOptions::Posix.shape(inputs(&c, &flags, None, false));
        assert!(set.sensitive_options.is_empty());
        assert_eq!(set.options, vec!["guest"]);
    }

    #[test]
    fn posix_gid_and_domain() {
        let c = creds("u", "p", "CORP");
        let flags: Vec<String> = Vec::new();
        let set = CredentialOptions::Posix.shape(inputs(&c, &flags, Some("2000"), false));
        assert_eq!(set.options, vec!["gid=2000", "domain=CORP"]);

        // An explicit gid flag wins over the mount group.
        let flags = vec!["gid=10".to_owned()];
        let set = CredentialOptions::Posix.shape(inputs(&c, &flags, Some("2000"), false));
        assert_eq!(set.options, vec!["gid=10", "domain=CORP"]);
    }

    #[test]
    fn windows_qualifies_username() {
        let shaping = CredentialOptions::for_platform(Platform::Windows, "AZURE");
        let c = creds("u", "p", "");
        let set = shaping.shape(inputs(&c, &[], None, false));
        assert_eq!(set.options, vec!["AZURE\\u"]);
        assert_eq!(set.sensitive_options, vec!["p"]);

        let c = creds("CORP\\u", "p", "OTHER");
        let set = shaping.shape(inputs(&c, &[], None, false));
        assert_eq!(set.options, vec!["CORP\\u"]);
    }

    #[test]
    fn option_set_debug_hides_sensitive() {
        let set = MountOptionSet {
            options: vec!["vers=3.0".into()],
            sensitive_options: vec!["username=u,password=secret".into()],
        };
        assert!(!format!("{set:?}").contains("secret"));
    }
}
