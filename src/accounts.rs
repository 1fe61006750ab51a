//! Administered accounts and the registry that holds them.
//!
//! Field names on the wire follow the directory's JSON and the raw audit
//! files already on disk:
//!   administrator:        { userid, username }
//!   administeredAccounts: [{ userid, patientProfile, permissons, lastupload }]
//!
//! The registry keeps insertion order. Sorted and filtered orderings are
//! borrowed views (`AccountView`); only the basic projection copies values.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// =============================================================================
// Records
// =============================================================================

/// Patient-specific profile fields, present only when the directory has them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis_date: Option<String>,
}

/// Public profile of an account (`/metadata/{id}/profile`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, deserialize_with = "null_as_default")]
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<PatientInfo>,
}

/// One audited account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "userid")]
    id: String,
    #[serde(rename = "patientProfile", default, deserialize_with = "null_as_default")]
    pub profile: Profile,
    /// Permission descriptor as the directory returned it. Never interpreted.
    #[serde(rename = "permissons", alias = "permissions", default)]
    pub permissions: serde_json::Value,
    #[serde(rename = "lastupload", default, deserialize_with = "null_as_default")]
    last_upload: String,
}

impl Account {
    pub fn new(id: impl Into<String>, permissions: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            profile: Profile::default(),
            permissions,
            last_upload: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn full_name(&self) -> &str {
        &self.profile.full_name
    }

    /// Last upload marker; empty until enrichment fills it.
    pub fn last_upload(&self) -> &str {
        &self.last_upload
    }

    pub fn has_upload(&self) -> bool {
        !self.last_upload.is_empty()
    }

    /// Record a last-upload value. Empty values never overwrite a populated
    /// marker. Returns true when the stored value changed.
    pub fn record_last_upload(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if value.is_empty() || value == self.last_upload {
            return false;
        }
        self.last_upload = value;
        true
    }
}

/// Reduced view of an account used by summary reports.
///
/// Only constructible from an `Account`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBasics {
    #[serde(rename = "userid")]
    id: String,
    full_name: String,
    last_upload: String,
}

impl AccountBasics {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn last_upload(&self) -> &str {
        &self.last_upload
    }
}

impl From<&Account> for AccountBasics {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            full_name: account.profile.full_name.clone(),
            last_upload: account.last_upload.clone(),
        }
    }
}

/// Identity of the administrator running the audit. The session credential
/// lives on the `Session` and is never part of this record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminIdentity {
    #[serde(rename = "userid", default)]
    pub id: String,
    #[serde(rename = "username", default)]
    pub name: String,
}

impl AdminIdentity {
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.name.is_empty()
    }
}

/// Top-level raw audit record: the administrator and every account it can see.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Administrator {
    #[serde(rename = "administrator", default)]
    pub identity: AdminIdentity,
    #[serde(
        rename = "administeredAccounts",
        default,
        deserialize_with = "null_as_default"
    )]
    pub accounts: AccountRegistry,
}

impl Administrator {
    pub fn new(identity: AdminIdentity) -> Self {
        Self {
            identity,
            accounts: AccountRegistry::new(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// Registry
// =============================================================================

/// Ordered collection of accounts with unique ids.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "Vec<Account>")]
pub struct AccountRegistry {
    accounts: Vec<Account>,
    ids: HashSet<String>,
}

impl Serialize for AccountRegistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.accounts.serialize(serializer)
    }
}

impl From<Vec<Account>> for AccountRegistry {
    fn from(accounts: Vec<Account>) -> Self {
        let mut registry = AccountRegistry::new();
        for account in accounts {
            registry.push(account);
        }
        registry
    }
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an account. Duplicate ids are dropped; returns false when the
    /// id was already present.
    pub fn push(&mut self, account: Account) -> bool {
        if !self.ids.insert(account.id.clone()) {
            log::warn!("Ignoring duplicate account [{}]", account.id);
            return false;
        }
        self.accounts.push(account);
        true
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn as_slice(&self) -> &[Account] {
        &self.accounts
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Account> {
        self.accounts.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Account> {
        self.accounts.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Account> {
        self.accounts.get_mut(index)
    }

    pub fn ids(&self) -> Vec<String> {
        self.accounts.iter().map(|a| a.id.clone()).collect()
    }

    /// Insertion-order view.
    pub fn view(&self) -> AccountView<'_> {
        AccountView {
            accounts: self.accounts.iter().collect(),
        }
    }

    pub fn sort_by_name(&self) -> AccountView<'_> {
        self.view().sort_by_name()
    }

    pub fn sort_by_recency(&self) -> AccountView<'_> {
        self.view().sort_by_recency()
    }

    pub fn filter_has_uploads(&self) -> AccountView<'_> {
        self.view().filter_has_uploads()
    }

    pub fn to_basic_projection(&self) -> Vec<AccountBasics> {
        self.view().to_basic_projection()
    }
}

impl<'a> IntoIterator for &'a AccountRegistry {
    type Item = &'a Account;
    type IntoIter = std::slice::Iter<'a, Account>;

    fn into_iter(self) -> Self::IntoIter {
        self.accounts.iter()
    }
}

// =============================================================================
// Views
// =============================================================================

/// A reordering or subset of registry accounts. Borrows; never copies.
#[derive(Debug, Clone)]
pub struct AccountView<'a> {
    accounts: Vec<&'a Account>,
}

impl<'a> From<&'a [Account]> for AccountView<'a> {
    fn from(accounts: &'a [Account]) -> Self {
        Self {
            accounts: accounts.iter().collect(),
        }
    }
}

impl<'a> AccountView<'a> {
    /// Reverse-alphabetical by full name.
    pub fn sort_by_name(mut self) -> Self {
        self.accounts
            .sort_by(|a, b| b.profile.full_name.cmp(&a.profile.full_name));
        self
    }

    /// Most recent upload first. Empty markers compare lowest, so accounts
    /// without an upload land at the end.
    pub fn sort_by_recency(mut self) -> Self {
        self.accounts.sort_by(|a, b| b.last_upload.cmp(&a.last_upload));
        self
    }

    pub fn filter_has_uploads(mut self) -> Self {
        self.accounts.retain(|a| a.has_upload());
        self
    }

    pub fn to_basic_projection(&self) -> Vec<AccountBasics> {
        self.accounts.iter().map(|a| AccountBasics::from(*a)).collect()
    }

    pub fn as_slice(&self) -> &[&'a Account] {
        &self.accounts
    }

    pub fn into_vec(self) -> Vec<&'a Account> {
        self.accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn ids(&self) -> Vec<&'a str> {
        self.accounts.iter().map(|a| a.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account(id: &str, name: &str, upload: &str) -> Account {
        let mut a = Account::new(id, json!({ "view": {} }));
        a.profile.full_name = name.to_string();
        a.record_last_upload(upload);
        a
    }

    fn registry(accounts: Vec<Account>) -> AccountRegistry {
        AccountRegistry::from(accounts)
    }

    #[test]
    fn test_sort_by_recency_scenario() {
        let reg = registry(vec![
            account("a", "Ann", ""),
            account("b", "Bob", "2024-01-01"),
            account("c", "Cat", "2023-06-15"),
        ]);

        let uploads: Vec<&str> = reg
            .sort_by_recency()
            .as_slice()
            .iter()
            .map(|a| a.last_upload())
            .collect();
        assert_eq!(uploads, vec!["2024-01-01", "2023-06-15", ""]);
    }

    #[test]
    fn test_sort_by_name_is_reverse_alphabetical() {
        let reg = registry(vec![
            account("1", "Alice", ""),
            account("2", "Charlie", ""),
            account("3", "Bob", ""),
        ]);
        assert_eq!(reg.sort_by_name().ids(), vec!["2", "3", "1"]);
    }

    #[test]
    fn test_views_do_not_reorder_registry() {
        let reg = registry(vec![
            account("1", "Alice", ""),
            account("2", "Charlie", "2024-02-01"),
        ]);
        let _ = reg.sort_by_name();
        let _ = reg.sort_by_recency();
        assert_eq!(reg.ids(), vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_filter_has_uploads() {
        let reg = registry(vec![
            account("1", "Alice", ""),
            account("2", "Bob", "2024-02-01"),
            account("3", "Cat", "2023-01-01"),
        ]);
        assert_eq!(reg.filter_has_uploads().ids(), vec!["2", "3"]);
    }

    #[test]
    fn test_basic_projection_preserves_view_order() {
        let reg = registry(vec![
            account("1", "Alice", "2020-01-01"),
            account("2", "Bob", "2024-02-01"),
        ]);
        let basics = reg.sort_by_recency().to_basic_projection();
        assert_eq!(basics.len(), 2);
        assert_eq!(basics[0].id(), "2");
        assert_eq!(basics[0].full_name(), "Bob");
        assert_eq!(basics[0].last_upload(), "2024-02-01");

        let value = serde_json::to_value(&basics[1]).unwrap();
        assert_eq!(
            value,
            json!({ "userid": "1", "fullName": "Alice", "lastUpload": "2020-01-01" })
        );
    }

    #[test]
    fn test_record_last_upload_never_reverts() {
        let mut a = Account::new("x", serde_json::Value::Null);
        assert!(!a.record_last_upload(""));
        assert!(a.record_last_upload("2024-01-01"));
        assert!(!a.record_last_upload(""));
        assert_eq!(a.last_upload(), "2024-01-01");
        assert!(a.record_last_upload("2024-03-01"));
        assert_eq!(a.last_upload(), "2024-03-01");
    }

    #[test]
    fn test_duplicate_ids_are_dropped() {
        let mut reg = AccountRegistry::new();
        assert!(reg.push(account("1", "Alice", "")));
        assert!(!reg.push(account("1", "Impostor", "")));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(0).unwrap().full_name(), "Alice");
        assert_eq!(reg.ids(), vec!["1".to_string()]);
    }

    #[test]
    fn test_large_listing_with_duplicates() {
        let accounts: Vec<Account> = (0..20_000)
            .map(|i| Account::new(format!("id-{}", i % 15_000), json!({})))
            .collect();
        let reg = AccountRegistry::from(accounts);
        assert_eq!(reg.len(), 15_000);
        assert_eq!(reg.get(14_999).unwrap().id(), "id-14999");
    }

    #[test]
    fn test_raw_wire_shape() {
        let mut admin = Administrator::new(AdminIdentity {
            id: "admin-1".into(),
            name: "admin@example.org".into(),
        });
        let mut a = account("u1", "Jane Doe", "2024-05-05T10:00:00Z");
        a.profile.patient = Some(PatientInfo {
            birthday: Some("1990-01-01".into()),
            diagnosis_date: Some("2000-02-02".into()),
        });
        admin.accounts.push(a);
        admin.accounts.push(Account::new("u2", json!({ "upload": {} })));

        let value = serde_json::to_value(&admin).unwrap();
        assert_eq!(
            value,
            json!({
                "administrator": { "userid": "admin-1", "username": "admin@example.org" },
                "administeredAccounts": [
                    {
                        "userid": "u1",
                        "patientProfile": {
                            "fullName": "Jane Doe",
                            "patient": { "birthday": "1990-01-01", "diagnosisDate": "2000-02-02" }
                        },
                        "permissons": { "view": {} },
                        "lastupload": "2024-05-05T10:00:00Z"
                    },
                    {
                        "userid": "u2",
                        "patientProfile": { "fullName": "" },
                        "permissons": { "upload": {} },
                        "lastupload": ""
                    }
                ]
            })
        );
    }

    #[test]
    fn test_reload_tolerates_nulls_and_alias() {
        let raw = r#"{
            "administrator": { "userid": "a", "username": "admin" },
            "administeredAccounts": [
                { "userid": "u1", "patientProfile": null, "permissions": { "root": {} }, "lastupload": null }
            ]
        }"#;
        let admin: Administrator = serde_json::from_str(raw).unwrap();
        let account = admin.accounts.get(0).unwrap();
        assert_eq!(account.id(), "u1");
        assert_eq!(account.profile, Profile::default());
        assert_eq!(account.permissions, json!({ "root": {} }));
        assert!(!account.has_upload());

        let empty: Administrator = serde_json::from_str(
            r#"{ "administrator": { "userid": "a", "username": "admin" }, "administeredAccounts": null }"#,
        )
        .unwrap();
        assert!(empty.accounts.is_empty());
    }

    #[test]
    fn test_profile_null_name_keeps_patient_fields() {
        let profile: Profile = serde_json::from_str(
            r#"{ "fullName": null, "patient": { "birthday": "1990-01-01" } }"#,
        )
        .unwrap();
        assert_eq!(profile.full_name, "");
        let patient = profile.patient.unwrap();
        assert_eq!(patient.birthday.as_deref(), Some("1990-01-01"));
        assert!(patient.diagnosis_date.is_none());
    }

    #[test]
    fn test_admin_identity_is_empty() {
        assert!(AdminIdentity::default().is_empty());
        assert!(!AdminIdentity {
            id: "1".into(),
            name: String::new()
        }
        .is_empty());
    }
}
