//! `RepositoryOps` over the repository server REST API.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use mergeit_core::{
    Branch, BranchInfo, BranchWithReview, Changeset, Label, MergeToOptions, MergeToResponse,
    MergeToStatus, RepositoryOps, Result, Review, ReviewStatus, XlinkChangeset,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientResult;
use crate::rest::{RestApi, endpoint, parse_bool, target_name};

const GET_BRANCH: &str = "/api/v1/repos/{}/branches/{}";
const GET_CHANGESET: &str = "/api/v1/repos/{}/changesets/{}";
const GET_ATTRIBUTE: &str = "/api/v1/repos/{}/attributes/{}/{}/{}";
const CHANGE_ATTRIBUTE: &str = "/api/v1/repos/{}/attributes/{}";
const CREATE_ATTRIBUTE: &str = "/api/v1/repos/{}/attributes";
const MERGE_TO: &str = "/api/v1/repos/{}/mergeto";
const IS_MERGE_ALLOWED: &str = "/api/v1/repos/{}/mergeto/allowed/{}?to={}";
const DELETE_SHELVE: &str = "/api/v1/repos/{}/shelve/{}";
const FIND: &str = "/api/v1/repos/{}/find?query={}&queryDateFormat={}&fields={}";
const FIND_BRANCHES_WITH_REVIEWS: &str = "/api/v1/repos/{}/findbrancheswithreviews?reviewConditions={}&branchConditions={}&queryDateFormat={}&fields={}";
const UPDATE_REVIEW: &str = "/api/v1/repos/{}/codereview/{}";
const CREATE_LABEL: &str = "/api/v1/repos/{}/labels";

/// Date format used inside find queries (`yyyy-MM-dd HH:mm:ss`).
const QUERY_DATE_FORMAT: &str = "yyyy-MM-dd HH:mm:ss";
const QUERY_DATE_STRFTIME: &str = "%Y-%m-%d %H:%M:%S";

/// Candidate branches are looked up over the last year.
const DISCOVERY_WINDOW_DAYS: i64 = 365;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchModel {
    id: i64,
    #[serde(default)]
    repository_id: String,
    #[serde(default)]
    head_changeset: i64,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    comment: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangesetModel {
    changeset_id: i64,
    #[serde(default)]
    guid: String,
    #[serde(default)]
    owner: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SingleResponse {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChangeAttributeRequest<'a> {
    target_name: &'a str,
    target_type: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateAttributeRequest<'a> {
    name: &'a str,
    comment: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MergeToRequest<'a> {
    source_type: &'static str,
    source: &'a str,
    destination: &'a str,
    comment: &'a str,
    create_shelve: bool,
    ensure_no_dst_changes: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeToModel {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    changeset_number: i64,
    #[serde(default)]
    xlink_changesets: Vec<XlinkModel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct XlinkModel {
    repository_name: String,
    changeset_id: i64,
}

#[derive(Debug, Deserialize)]
struct MergeAllowedResponse {
    #[serde(default)]
    result: String,
}

#[derive(Debug, Serialize)]
struct CreateLabelRequest<'a> {
    name: &'a str,
    changeset: i64,
    comment: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateReviewRequest<'a> {
    status: i32,
    title: &'a str,
}

impl MergeToModel {
    fn into_response(self) -> ClientResult<MergeToResponse> {
        let status: MergeToStatus = self.status.parse().map_err(|_| {
            crate::error::ClientError::UnexpectedResponse(format!(
                "unknown merge status '{}'",
                self.status
            ))
        })?;

        Ok(MergeToResponse {
            status,
            message: self.message,
            changeset_number: self.changeset_number,
            xlink_changesets: self
                .xlink_changesets
                .into_iter()
                .map(|x| XlinkChangeset {
                    repository: x.repository_name,
                    changeset_id: x.changeset_id,
                })
                .collect(),
        })
    }
}

impl RestApi {
    async fn find(
        &self,
        repository: &str,
        query: &str,
        fields: &[&str],
        action: &str,
    ) -> ClientResult<Vec<Value>> {
        let path = endpoint(
            FIND,
            &[repository, query, QUERY_DATE_FORMAT, &fields.join(",")],
        );
        self.get(&path, action).await
    }

    async fn merge_to(
        &self,
        repository: &str,
        source: &str,
        source_type: &'static str,
        destination: &str,
        comment: &str,
        options: MergeToOptions,
    ) -> ClientResult<MergeToResponse> {
        let request = MergeToRequest {
            source_type,
            source,
            destination,
            comment,
            create_shelve: options.create_shelve,
            ensure_no_dst_changes: options.ensure_no_dst_changes,
        };
        let action = format!("merge from {} '{}' to '{}'", source_type, source, destination);
        let model: MergeToModel = self
            .send_json(
                Method::POST,
                &endpoint(MERGE_TO, &[repository]),
                &request,
                &action,
            )
            .await?;
        model.into_response()
    }
}

#[async_trait]
impl RepositoryOps for RestApi {
    async fn get_branch(&self, repository: &str, branch_name: &str) -> Result<Option<BranchInfo>> {
        let path = endpoint(GET_BRANCH, &[repository, target_name(branch_name)]);
        let action = format!("get info of branch br:{}@{}", branch_name, repository);

        let model: BranchModel = match self.get(&path, &action).await {
            Ok(model) => model,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(BranchInfo {
            branch: Branch::new(repository, model.id, branch_name, model.owner, model.comment),
            repository_id: model.repository_id,
            head_changeset: model.head_changeset,
        }))
    }

    async fn get_branch_name(&self, repository: &str, branch_id: i64) -> Result<Option<String>> {
        let rows = self
            .find(
                repository,
                &format!("branch where id={}", branch_id),
                &["name"],
                "retrieve a single branch by ID",
            )
            .await?;

        Ok(rows
            .first()
            .map(|row| string_field(row, "name"))
            .filter(|name| !name.is_empty()))
    }

    async fn get_changeset(&self, repository: &str, changeset_id: i64) -> Result<Changeset> {
        let path = endpoint(GET_CHANGESET, &[repository, &changeset_id.to_string()]);
        let action = format!("get info of changeset cs:{}@{}", changeset_id, repository);
        let model: ChangesetModel = self.get(&path, &action).await?;

        Ok(Changeset {
            id: model.changeset_id,
            guid: model.guid,
            owner: model.owner,
        })
    }

    async fn get_branch_attribute(
        &self,
        repository: &str,
        branch_name: &str,
        attribute: &str,
    ) -> Result<Option<String>> {
        let path = endpoint(
            GET_ATTRIBUTE,
            &[repository, attribute, "Branch", target_name(branch_name)],
        );
        let action = format!(
            "get value of attribute '{}@{}' applied to Branch '{}'",
            attribute, repository, branch_name
        );

        match self.get::<SingleResponse>(&path, &action).await {
            Ok(response) if response.value.is_empty() => Ok(None),
            Ok(response) => Ok(Some(response.value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_branch_attribute(
        &self,
        repository: &str,
        branch_name: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        let request = ChangeAttributeRequest {
            target_name: branch_name,
            target_type: "Branch",
            value,
        };
        let action = format!(
            "set attribute '{}@{}' applied to Branch '{}' to value '{}'",
            attribute, repository, branch_name, value
        );

        self.execute(
            Method::PUT,
            &endpoint(CHANGE_ATTRIBUTE, &[repository, attribute]),
            Some(&request),
            &action,
        )
        .await?;
        Ok(())
    }

    async fn attribute_exists(&self, repository: &str, attribute: &str) -> Result<bool> {
        let rows = self
            .find(
                repository,
                &format!("attributetype where name='{}' ", attribute),
                &["name"],
                &format!("retrieve the list of attributes named {}", attribute),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn create_attribute(
        &self,
        repository: &str,
        attribute: &str,
        comment: &str,
    ) -> Result<bool> {
        let request = CreateAttributeRequest {
            name: attribute,
            comment,
        };
        let action = format!("create attribute name {} on repo {}", attribute, repository);
        let response: SingleResponse = self
            .send_json(
                Method::POST,
                &endpoint(CREATE_ATTRIBUTE, &[repository]),
                &request,
                &action,
            )
            .await?;
        Ok(parse_bool(&response.value))
    }

    async fn find_resolved_branches(
        &self,
        repository: &str,
        prefix: &str,
        attribute: &str,
        resolved_value: &str,
    ) -> Result<Vec<Branch>> {
        let query = resolved_branches_query(prefix, attribute, resolved_value, Utc::now());
        let rows = self
            .find(
                repository,
                &query,
                &["id", "name", "owner", "comment"],
                "retrieve the list of branches to process",
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(Branch::new(
                    repository,
                    int_field(row, "id")?,
                    string_field(row, "name"),
                    string_field(row, "owner"),
                    string_field(row, "comment"),
                ))
            })
            .collect())
    }

    async fn find_pending_branches_with_reviews(
        &self,
        repository: &str,
        prefix: &str,
        attribute: &str,
        merged_value: &str,
    ) -> Result<Vec<BranchWithReview>> {
        let conditions = pending_branches_conditions(prefix, attribute, merged_value, Utc::now());
        let fields = [
            "branchid",
            "branchname",
            "branchowner",
            "branchcomment",
            "reviewid",
            "reviewtargetid",
            "reviewstatus",
            "reviewtitle",
        ]
        .join(",");
        let path = endpoint(
            FIND_BRANCHES_WITH_REVIEWS,
            &[repository, "", &conditions, QUERY_DATE_FORMAT, &fields],
        );

        let rows: Vec<Value> = self
            .get(&path, "retrieve the list of branches with reviews to process")
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| parse_branch_with_review(repository, row))
            .collect())
    }

    async fn find_most_recent_label(
        &self,
        repository: &str,
        pattern: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<Label>> {
        let mut query = format!("marker where name like '{}' ", pattern);
        if let Some(since) = since {
            query.push_str(&format!(
                "and date > '{}'",
                since.format(QUERY_DATE_STRFTIME)
            ));
        }

        let rows = self
            .find(
                repository,
                &query,
                &["name", "date", "changeset"],
                "find last label matching a pattern",
            )
            .await?;

        Ok(most_recent_label(&rows))
    }

    async fn merge_branch_to(
        &self,
        repository: &str,
        source_branch: &str,
        destination_branch: &str,
        comment: &str,
        options: MergeToOptions,
    ) -> Result<MergeToResponse> {
        Ok(self
            .merge_to(
                repository,
                source_branch,
                "Branch",
                destination_branch,
                comment,
                options,
            )
            .await?)
    }

    async fn merge_shelve_to(
        &self,
        repository: &str,
        shelve_id: i64,
        destination_branch: &str,
        comment: &str,
        options: MergeToOptions,
    ) -> Result<MergeToResponse> {
        Ok(self
            .merge_to(
                repository,
                &shelve_id.to_string(),
                "Shelve",
                destination_branch,
                comment,
                options,
            )
            .await?)
    }

    async fn delete_shelve(&self, repository: &str, shelve_id: i64) -> Result<()> {
        let path = endpoint(DELETE_SHELVE, &[repository, &shelve_id.to_string()]);
        let action = format!("delete shelve sh:{}@{}", shelve_id, repository);
        self.execute(Method::DELETE, &path, None::<&()>, &action)
            .await?;
        Ok(())
    }

    async fn is_merge_allowed(
        &self,
        repository: &str,
        source_branch: &str,
        destination_branch: &str,
    ) -> Result<bool> {
        let path = endpoint(
            IS_MERGE_ALLOWED,
            &[
                repository,
                target_name(source_branch),
                target_name(destination_branch),
            ],
        );
        let action = format!(
            "check whether merge is allowed on repo {} from '{}' to '{}'",
            repository, source_branch, destination_branch
        );
        let response: MergeAllowedResponse = self.get(&path, &action).await?;
        Ok(response.result.trim().eq_ignore_ascii_case("ok"))
    }

    async fn create_label(
        &self,
        repository: &str,
        name: &str,
        changeset_id: i64,
        comment: &str,
    ) -> Result<()> {
        let request = CreateLabelRequest {
            name,
            changeset: changeset_id,
            comment,
        };
        self.execute(
            Method::POST,
            &endpoint(CREATE_LABEL, &[repository]),
            Some(&request),
            &format!("create label {}", name),
        )
        .await?;
        Ok(())
    }

    async fn update_code_review(
        &self,
        repository: &str,
        review_id: i64,
        status: i32,
        title: &str,
    ) -> Result<()> {
        let request = UpdateReviewRequest { status, title };
        let action = format!(
            "update review id {} to status {} and title {}",
            review_id, status, title
        );
        self.execute(
            Method::PUT,
            &endpoint(UPDATE_REVIEW, &[repository, &review_id.to_string()]),
            Some(&request),
            &action,
        )
        .await?;
        Ok(())
    }
}

/// Match a value in its configured, lower and upper case spellings.
fn any_case(column: &str, value: &str, like: bool) -> String {
    let (op, suffix) = if like { (" like ", "%") } else { ("=", "") };
    [
        value.to_string(),
        value.to_lowercase(),
        value.to_uppercase(),
    ]
    .iter()
    .map(|v| format!("{}{}'{}{}'", column, op, v, suffix))
    .collect::<Vec<_>>()
    .join(" or ")
}

fn resolved_branches_query(
    prefix: &str,
    attribute: &str,
    resolved_value: &str,
    now: DateTime<Utc>,
) -> String {
    format!(
        "branch where ( {} ) and date > '{}' and attribute='{}' and ( {} ) ",
        any_case("name", prefix, true),
        (now - Duration::days(DISCOVERY_WINDOW_DAYS)).format(QUERY_DATE_STRFTIME),
        attribute,
        any_case("attrvalue", resolved_value, false),
    )
}

fn pending_branches_conditions(
    prefix: &str,
    attribute: &str,
    merged_value: &str,
    now: DateTime<Utc>,
) -> String {
    format!(
        "( {} ) and ( date > '{}' ) and ( (not attribute='{}') or (attribute='{}' and not ( {} )) ) ",
        any_case("name", prefix, true),
        (now - Duration::days(DISCOVERY_WINDOW_DAYS)).format(QUERY_DATE_STRFTIME),
        attribute,
        attribute,
        any_case("attrvalue", merged_value, false),
    )
}

fn parse_branch_with_review(repository: &str, row: &Value) -> Option<BranchWithReview> {
    let branch_id = int_field(row, "branchid")?;
    let branch = Branch::new(
        repository,
        branch_id,
        string_field(row, "branchname"),
        string_field(row, "branchowner"),
        string_field(row, "branchcomment"),
    );
    let review = Review::new(
        repository,
        int_field(row, "reviewid")?,
        int_field(row, "reviewtargetid").unwrap_or(branch_id),
        ReviewStatus::parse(&string_field(row, "reviewstatus")),
        string_field(row, "reviewtitle"),
    );
    Some(BranchWithReview { branch, review })
}

fn most_recent_label(rows: &[Value]) -> Option<Label> {
    rows.iter()
        .filter_map(|row| {
            Some(Label {
                name: string_field(row, "name"),
                date: parse_date(&string_field(row, "date"))?,
                changeset_id: int_field(row, "changeset").unwrap_or_default(),
            })
        })
        .max_by_key(|label| label.date)
}

/// Text of a find result column; numbers are rendered, missing is empty.
pub(crate) fn string_field(row: &Value, name: &str) -> String {
    match row.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

pub(crate) fn int_field(row: &Value, name: &str) -> Option<i64> {
    match row.get(name)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
