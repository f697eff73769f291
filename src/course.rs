//! Course-management service collaborator.
//!
//! A thin blocking HTTP client over the service's REST surface plus the
//! two download actions that populate the submission store. The contract
//! is narrow: list groups and roster rows, fetch submission/starter
//! archives. Failures surface as `RemoteService` with the HTTP status.
use crate::error::Error;
use crate::model::{clean_file_name, Group, Member, Roster};
use crate::pipeline::ActionContext;
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use ureq::Agent;

// Archive downloads can be large; raise the body limit well past the
// default.
const BODY_LIMIT: u64 = 512 * 1024 * 1024;

pub struct CourseClient {
    agent: Agent,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct CourseRecord {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AssignmentRecord {
    id: u64,
    short_identifier: String,
}

#[derive(Debug, Deserialize)]
pub struct GroupRecord {
    pub id: u64,
    pub group_name: String,
    #[serde(default)]
    pub members: Vec<MembershipRecord>,
}

#[derive(Debug, Deserialize)]
pub struct MembershipRecord {
    pub role_id: u64,
}

#[derive(Debug, Deserialize)]
struct RoleRecord {
    id: u64,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    id_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StarterGroupRecord {
    pub id: u64,
}

impl CourseClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            agent: Agent::new_with_defaults(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let mut response = self
            .agent
            .get(url.as_str())
            .header("Authorization", self.api_key.as_str())
            .call()
            .map_err(|err| remote_error(path, err))?;
        response
            .body_mut()
            .read_json()
            .with_context(|| format!("parse response from {path}"))
    }

    fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let url = format!("{}{path}", self.base_url);
        let mut response = self
            .agent
            .get(url.as_str())
            .header("Authorization", self.api_key.as_str())
            .call()
            .map_err(|err| remote_error(path, err))?;
        response
            .body_mut()
            .with_config()
            .limit(BODY_LIMIT)
            .read_to_vec()
            .with_context(|| format!("read response from {path}"))
    }

    pub fn find_course_id(&self, name: &str) -> Result<u64> {
        let courses: Vec<CourseRecord> = self.get_json("/api/courses.json")?;
        let options: Vec<&str> = courses.iter().map(|c| c.name.as_str()).collect();
        courses
            .iter()
            .find(|course| course.name == name)
            .map(|course| course.id)
            .ok_or_else(|| anyhow!("no course named {name} (options: {})", options.join(", ")))
    }

    pub fn find_assignment_id(&self, course_id: u64, short_identifier: &str) -> Result<u64> {
        let assignments: Vec<AssignmentRecord> =
            self.get_json(&format!("/api/courses/{course_id}/assignments.json"))?;
        let options: Vec<&str> = assignments
            .iter()
            .map(|a| a.short_identifier.as_str())
            .collect();
        assignments
            .iter()
            .find(|assignment| assignment.short_identifier == short_identifier)
            .map(|assignment| assignment.id)
            .ok_or_else(|| {
                anyhow!(
                    "no assignment {short_identifier} (options: {})",
                    options.join(", ")
                )
            })
    }

    pub fn groups(&self, course_id: u64, assignment_id: u64) -> Result<Vec<GroupRecord>> {
        self.get_json(&format!(
            "/api/courses/{course_id}/assignments/{assignment_id}/groups.json"
        ))
    }

    /// Roster rows for the whole course, keyed by role id.
    pub fn roles(&self, course_id: u64) -> Result<BTreeMap<u64, Member>> {
        let roles: Vec<RoleRecord> =
            self.get_json(&format!("/api/courses/{course_id}/roles.json"))?;
        Ok(roles
            .into_iter()
            .map(|role| {
                (
                    role.id,
                    Member {
                        user_name: role.user_name,
                        first_name: role.first_name,
                        last_name: role.last_name,
                        email: role.email,
                        id_number: role.id_number.unwrap_or_default(),
                    },
                )
            })
            .collect())
    }

    pub fn collected_submission_zip(
        &self,
        course_id: u64,
        assignment_id: u64,
        group_id: u64,
    ) -> Result<Vec<u8>> {
        self.get_bytes(&format!(
            "/api/courses/{course_id}/assignments/{assignment_id}/groups/{group_id}/submission_files.json?collected=true"
        ))
    }

    pub fn starter_file_groups(
        &self,
        course_id: u64,
        assignment_id: u64,
    ) -> Result<Vec<StarterGroupRecord>> {
        self.get_json(&format!(
            "/api/courses/{course_id}/assignments/{assignment_id}/starter_file_groups.json"
        ))
    }

    pub fn starter_zip(
        &self,
        course_id: u64,
        assignment_id: u64,
        starter_group_id: u64,
    ) -> Result<Vec<u8>> {
        self.get_bytes(&format!(
            "/api/courses/{course_id}/assignments/{assignment_id}/starter_file_groups/{starter_group_id}/entries"
        ))
    }
}

fn remote_error(path: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::StatusCode(code) => {
            Error::remote(Some(code), format!("request to {path} rejected")).into()
        }
        other => Error::remote(None, format!("request to {path} failed: {other}")).into(),
    }
}

/// Download collected submission archives for every (filtered) group and
/// write the roster snapshot. Groups whose directory already exists are
/// left alone unless the run is forced, so a crashed run resumes where it
/// stopped.
pub fn download_submissions(ctx: &ActionContext) -> Result<()> {
    let config = &ctx.config;
    let client = CourseClient::new(config.service_url()?, config.api_key()?);
    let course_id = client.find_course_id(config.course()?)?;
    let assignment_id = client.find_assignment_id(course_id, config.assignment()?)?;

    let roles = client.roles(course_id)?;
    let mut roster = Roster::default();

    for record in client.groups(course_id, assignment_id)? {
        if !config.group_selected(&record.group_name) {
            continue;
        }
        let clean_name = clean_file_name(&record.group_name);
        let destination = ctx.paths.group_submission_dir(&clean_name);
        if destination.is_dir() && !config.force {
            tracing::debug!(group = %record.group_name, "submission files present, skipping");
        } else {
            tracing::info!(group = %record.group_name, "downloading submission files");
            let archive =
                client.collected_submission_zip(course_id, assignment_id, record.id)?;
            unzip_into(&archive, &destination)?;
        }

        let members = record
            .members
            .iter()
            .filter_map(|membership| roles.get(&membership.role_id).cloned())
            .collect();
        let files = crate::util::collect_files_recursive(&destination)?
            .iter()
            .map(|path| crate::util::display_path(path, Some(&destination)))
            .collect();
        roster.groups.push(Group {
            name: clean_name,
            members,
            files,
        });
    }

    roster.save(&ctx.paths.roster_path())?;
    Ok(())
}

/// Download starter-file archives so the similarity stage can submit them
/// as base files.
pub fn download_starters(ctx: &ActionContext) -> Result<()> {
    let config = &ctx.config;
    let client = CourseClient::new(config.service_url()?, config.api_key()?);
    let course_id = client.find_course_id(config.course()?)?;
    let assignment_id = client.find_assignment_id(course_id, config.assignment()?)?;

    for record in client.starter_file_groups(course_id, assignment_id)? {
        let destination = ctx.paths.starters_org_dir().join(record.id.to_string());
        if destination.is_dir() && !config.force {
            tracing::debug!(starter_group = record.id, "starter files present, skipping");
            continue;
        }
        tracing::info!(starter_group = record.id, "downloading starter files");
        let archive = client.starter_zip(course_id, assignment_id, record.id)?;
        unzip_into(&archive, &destination)?;
    }
    Ok(())
}

/// Extract an archive under `destination`, stripping the wrapping
/// top-level directory the service puts around every entry.
pub fn unzip_into(bytes: &[u8], destination: &Path) -> Result<()> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("open submission archive")?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).context("read archive entry")?;
        let Some(name) = entry.enclosed_name().map(|path| path.to_path_buf()) else {
            continue;
        };
        let mut components = name.components();
        components.next();
        let rel = components.as_path();
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest = destination.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&dest).with_context(|| format!("create {}", dest.display()))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let mut out =
            fs::File::create(&dest).with_context(|| format!("create {}", dest.display()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("extract {}", dest.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_archive() -> Vec<u8> {
        let cursor = Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(cursor);
        let options = zip::write::FileOptions::default();
        writer.start_file("wrapper/src/main.py", options).unwrap();
        writer.write_all(b"print('hi')\n").unwrap();
        writer.start_file("wrapper/README", options).unwrap();
        writer.write_all(b"notes\n").unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn unzip_strips_the_wrapping_directory() {
        let dir = tempfile::tempdir().unwrap();
        unzip_into(&sample_archive(), dir.path()).unwrap();
        assert!(dir.path().join("src/main.py").is_file());
        assert!(dir.path().join("README").is_file());
        assert!(!dir.path().join("wrapper").exists());
    }
}
