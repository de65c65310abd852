//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Browse-path resolution of target variable nodes."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::session::{ChildRef, NodeId, SessionError, UaSession};

/// Variable name to node id, in the order the names were requested.
pub type ResolvedNodes = IndexMap<String, NodeId>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("path segment '{segment}' not found under {parent}")]
    SegmentNotFound { segment: String, parent: String },
    #[error("variable '{name}' not found under {parent}")]
    VariableNotFound { name: String, parent: String },
    #[error("browse name '{name}' is ambiguous under {parent} ({count} matches)")]
    Ambiguous {
        name: String,
        parent: String,
        count: usize,
    },
    #[error(transparent)]
    Browse(#[from] SessionError),
}

/// Walks a browse path from a root node and looks up variables by browse name.
///
/// Matching is exact and case-sensitive. The first missing segment aborts the
/// whole resolution; no partial mapping is ever returned.
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeResolver;

impl NodeResolver {
    pub async fn resolve(
        session: &dyn UaSession,
        root: &NodeId,
        channel_path: &[String],
        variables: &[String],
    ) -> Result<ResolvedNodes, ResolutionError> {
        let mut container = root.clone();
        for segment in channel_path {
            let children = session.browse_children(&container).await?;
            container = match find_child(&children, segment, &container)? {
                Some(node) => node,
                None => {
                    return Err(ResolutionError::SegmentNotFound {
                        segment: segment.clone(),
                        parent: container.to_string(),
                    })
                }
            };
            debug!(segment = %segment, node = %container, "path segment resolved");
        }

        let children = session.browse_children(&container).await?;
        let mut resolved = ResolvedNodes::with_capacity(variables.len());
        for name in variables {
            match find_child(&children, name, &container)? {
                Some(node) => {
                    resolved.insert(name.clone(), node);
                }
                None => {
                    return Err(ResolutionError::VariableNotFound {
                        name: name.clone(),
                        parent: container.to_string(),
                    })
                }
            }
        }
        Ok(resolved)
    }
}

fn find_child(
    children: &[ChildRef],
    name: &str,
    parent: &NodeId,
) -> Result<Option<NodeId>, ResolutionError> {
    let mut matches = children.iter().filter(|child| child.browse_name == name);
    let first = matches.next();
    let extra = matches.count();
    if extra > 0 {
        return Err(ResolutionError::Ambiguous {
            name: name.to_owned(),
            parent: parent.to_string(),
            count: extra + 1,
        });
    }
    Ok(first.map(|child| child.node_id.clone()))
}
