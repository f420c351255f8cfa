//! Agent health check.
//!
//! Probes every agent with a read; the leader answers directly, followers
//! answer 307 with a Location header naming the leader. The set is healthy
//! only when exactly one agent self-identifies as leader and every follower
//! points at that leader (hostnames compared scheme-insensitively).

use std::sync::Arc;

use serde_json::json;

use drover_core::{Body, Connection, Error, Request, RequestOptions, Result};

use super::READ_PATH;

pub async fn are_agents_healthy(
    agents: &[Arc<dyn Connection>],
    options: &RequestOptions,
) -> Result<()> {
    if agents.is_empty() {
        return Err(Error::invalid_argument("no agents to check"));
    }

    let mut leaders: Vec<String> = Vec::new();
    let mut follower_targets: Vec<String> = Vec::new();

    for agent in agents {
        let mut req = Request::post(READ_PATH);
        req.set_body(Body::Value(json!([["/"]])));
        req.options.allowed_status = Some(vec![200, 307]);
        let resp = agent.send(req).await?;

        if resp.status == 307 {
            let target = resp.header("location").unwrap_or("").to_string();
            tracing::debug!(agent = %resp.endpoint, leader = %target, "agent is follower");
            follower_targets.push(target);
        } else {
            tracing::debug!(agent = %resp.endpoint, "agent is leader");
            let endpoint = if resp.endpoint.is_empty() {
                agent.endpoints().into_iter().next().unwrap_or_default()
            } else {
                resp.endpoint.clone()
            };
            leaders.push(endpoint);
        }
    }

    match leaders.as_slice() {
        [] if options.allow_no_leader => Ok(()),
        [] => Err(Error::NoLeader),
        [leader] => {
            let disagreeing = follower_targets
                .iter()
                .any(|target| !same_host(target, leader));
            if disagreeing && !options.allow_different_leader_endpoints {
                return Err(Error::LeadershipChallengeOngoing);
            }
            Ok(())
        }
        _ => Err(Error::LeadershipChallengeOngoing),
    }
}

/// Compare the host[:port] part, ignoring scheme, path, and case.
fn same_host(a: &str, b: &str) -> bool {
    host_of(a).eq_ignore_ascii_case(&host_of(b))
}

fn host_of(endpoint: &str) -> &str {
    let rest = endpoint
        .split_once("://")
        .map(|(_, r)| r)
        .unwrap_or(endpoint);
    rest.split('/').next().unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use drover_core::{Authentication, Response};

    struct FakeAgent {
        endpoint: String,
        /// None = leader; Some(url) = follower redirecting to url.
        redirect: Option<String>,
    }

    #[async_trait]
    impl Connection for FakeAgent {
        async fn send(&self, _req: Request) -> Result<Response> {
            let mut resp = match &self.redirect {
                None => Response::new(200, "application/json", Bytes::from_static(b"[{}]")),
                Some(url) => {
                    let mut r = Response::new(307, "", Bytes::new());
                    r.set_header("location", url.clone());
                    r
                }
            };
            resp = resp.with_endpoint(&self.endpoint);
            Ok(resp)
        }

        fn endpoints(&self) -> Vec<String> {
            vec![self.endpoint.clone()]
        }

        async fn set_authentication(&self, _auth: Authentication) -> Result<()> {
            Ok(())
        }
    }

    fn agent(endpoint: &str, redirect: Option<&str>) -> Arc<dyn Connection> {
        Arc::new(FakeAgent {
            endpoint: endpoint.into(),
            redirect: redirect.map(String::from),
        })
    }

    #[tokio::test]
    async fn one_leader_with_agreeing_followers_is_healthy() {
        let agents = vec![
            agent("http://a1:8529", None),
            agent("http://a2:8529", Some("http://a1:8529/_api/agency/read")),
            agent("http://a3:8529", Some("https://A1:8529/_api/agency/read")),
        ];
        assert!(are_agents_healthy(&agents, &RequestOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn no_leader_is_unhealthy_unless_allowed() {
        let agents = vec![
            agent("http://a1:8529", Some("http://a2:8529")),
            agent("http://a2:8529", Some("http://a1:8529")),
        ];
        let err = are_agents_healthy(&agents, &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoLeader));

        let relaxed = RequestOptions {
            allow_no_leader: true,
            ..RequestOptions::default()
        };
        assert!(are_agents_healthy(&agents, &relaxed).await.is_ok());
    }

    #[tokio::test]
    async fn two_leaders_is_a_challenge() {
        let agents = vec![agent("http://a1:8529", None), agent("http://a2:8529", None)];
        let err = are_agents_healthy(&agents, &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LeadershipChallengeOngoing));
    }

    #[tokio::test]
    async fn disagreeing_follower_is_a_challenge_unless_allowed() {
        let agents = vec![
            agent("http://a1:8529", None),
            agent("http://a2:8529", Some("http://elsewhere:8529")),
        ];
        let err = are_agents_healthy(&agents, &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LeadershipChallengeOngoing));

        let relaxed = RequestOptions {
            allow_different_leader_endpoints: true,
            ..RequestOptions::default()
        };
        assert!(are_agents_healthy(&agents, &relaxed).await.is_ok());
    }
}
