//! Portal route table: the access policy each page declares.
//!
//! DESIGN
//! ======
//! Routes match on whole path segments and the longest matching prefix
//! wins, so `/dashboard/faculty/grades` inherits the faculty dashboard's
//! policy. Unknown paths require a signed-in user: a missing entry can
//! never make a page public.

#[cfg(test)]
#[path = "routes_test.rs"]
mod routes_test;

use crate::services::guard::AccessPolicy;
use crate::state::auth::Role;

#[derive(Debug, Clone, Copy)]
enum Rule {
    Public,
    Authenticated,
    Roles(&'static [Role]),
}

const TEACHING: &[Role] = &[Role::Student, Role::Faculty];
const STAFF: &[Role] = &[Role::Faculty, Role::Superadmin];

const ROUTES: &[(&str, Rule)] = &[
    ("/", Rule::Public),
    ("/login", Rule::Public),
    ("/signup", Rule::Public),
    ("/dashboard", Rule::Authenticated),
    ("/dashboard/student", Rule::Roles(&[Role::Student])),
    ("/dashboard/faculty", Rule::Roles(&[Role::Faculty])),
    ("/dashboard/superadmin", Rule::Roles(&[Role::Superadmin])),
    ("/assignments", Rule::Roles(TEACHING)),
    ("/assignments/new", Rule::Roles(&[Role::Faculty])),
    ("/groups", Rule::Roles(TEACHING)),
    ("/submissions", Rule::Roles(TEACHING)),
    ("/attendance", Rule::Roles(STAFF)),
    ("/admin", Rule::Roles(&[Role::Superadmin])),
];

/// Access policy for `path`. Query strings, fragments, and trailing slashes are ignored.
#[must_use]
pub fn policy_for(path: &str) -> AccessPolicy {
    let path = normalize(path);
    let rule = ROUTES
        .iter()
        .filter(|(prefix, _)| matches_prefix(path, prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map_or(Rule::Authenticated, |(_, rule)| *rule);

    match rule {
        Rule::Public => AccessPolicy::Public,
        Rule::Authenticated => AccessPolicy::Authenticated,
        Rule::Roles(roles) => AccessPolicy::roles(roles),
    }
}

fn normalize(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let path = path[..end].trim_end_matches('/');
    if path.is_empty() { "/" } else { path }
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return path == "/";
    }
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
