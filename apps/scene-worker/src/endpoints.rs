//! URL construction for each asset endpoint of the scene service.

use serde_json::Value;
use url::Url;

use crate::error::{WorkerError, WorkerResult};
use crate::fetch::{FetchRequest, ResponseKind};
use crate::host::HostMessage;
use crate::pipeline::Delivery;

/// A fetch ready for the scheduler plus the batch flag its commands carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub request: FetchRequest,
    pub is_initial: bool,
}

impl FetchPlan {
    pub fn delivery(&self) -> Delivery {
        Delivery {
            is_initial: self.is_initial,
            kind: self.request.kind,
        }
    }

    fn binary(url: Url) -> Self {
        Self {
            request: FetchRequest::new(url, ResponseKind::Binary),
            is_initial: false,
        }
    }

    fn text(url: Url) -> Self {
        Self {
            request: FetchRequest::new(url, ResponseKind::Text),
            is_initial: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    pub fn new(base_url: &str) -> WorkerResult<Self> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(WorkerError::InvalidRequest(format!(
                "base url {base_url} cannot carry a path"
            )));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Builds the fetch for a data message. Control messages have no endpoint.
    pub fn plan(&self, message: &HostMessage) -> WorkerResult<FetchPlan> {
        match message {
            HostMessage::GetScene { scene_id } => {
                Ok(FetchPlan::text(self.url(&["scenes", scene_id])?))
            }
            HostMessage::GetView {
                scene_id,
                view_id,
                query,
                sids,
                is_initial,
                is_partial_tree,
            } => {
                let mut url = self.url(&["scenes", scene_id, "views", view_id])?;
                append_query(&mut url, query.as_ref());
                if let Some(sids) = sids.as_ref().filter(|sids| !sids.is_empty()) {
                    url.query_pairs_mut().append_pair("sids", &sids.join(","));
                }
                if *is_partial_tree == Some(true) {
                    url.query_pairs_mut().append_pair("partialTree", "true");
                }
                let mut plan = FetchPlan::binary(url);
                plan.is_initial = is_initial.unwrap_or(false);
                Ok(plan)
            }
            HostMessage::GetMaterial {
                scene_id,
                material_ids,
            } => self.id_list(scene_id, "materials", material_ids, &[]),
            HostMessage::GetAnnotation {
                scene_id,
                annotation_ids,
            } => self.id_list(scene_id, "annotations", annotation_ids, &[]),
            HostMessage::GetGeomMesh { scene_id, mesh_ids } => {
                self.id_list(scene_id, "geomMeshes", mesh_ids, &[])
            }
            HostMessage::GetMesh { scene_id, mesh_ids } => {
                self.id_list(scene_id, "meshes", mesh_ids, &[("content", "boxes")])
            }
            HostMessage::GetImage {
                scene_id,
                material_id,
                view_id,
                image_id,
            } => {
                let url = match (scene_id, material_id, view_id) {
                    (Some(scene), Some(material), _) => self.url(&[
                        "scenes", scene, "materials", material, "images", image_id,
                    ])?,
                    (Some(scene), None, Some(view)) => {
                        self.url(&["scenes", scene, "views", view, "images", image_id])?
                    }
                    (Some(scene), None, None) => {
                        self.url(&["scenes", scene, "images", image_id])?
                    }
                    (None, _, _) => {
                        return Err(WorkerError::InvalidRequest(format!(
                            "image {image_id} has no owning scene"
                        )))
                    }
                };
                Ok(FetchPlan::binary(url))
            }
            HostMessage::GetViewGroups {
                scene_id,
                view_group_id,
            } => {
                let url = match view_group_id {
                    Some(group) => self.url(&["scenes", scene_id, "viewGroups", group])?,
                    None => self.url(&["scenes", scene_id, "viewGroups"])?,
                };
                Ok(FetchPlan::text(url))
            }
            HostMessage::GetViewAnimations {
                scene_id,
                view_id,
                query,
            } => {
                let mut url = self.url(&["scenes", scene_id, "views", view_id, "animations"])?;
                append_query(&mut url, query.as_ref());
                Ok(FetchPlan::binary(url))
            }
            other => Err(WorkerError::InvalidRequest(format!(
                "{} does not fetch anything",
                other.method()
            ))),
        }
    }

    fn id_list(
        &self,
        scene_id: &str,
        collection: &str,
        ids: &[String],
        extra: &[(&str, &str)],
    ) -> WorkerResult<FetchPlan> {
        if ids.is_empty() {
            return Err(WorkerError::InvalidRequest(format!(
                "no ids given for {collection}"
            )));
        }
        let mut url = self.url(&["scenes", scene_id, collection])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("ids", &ids.join(","));
            for (key, value) in extra {
                pairs.append_pair(key, value);
            }
        }
        Ok(FetchPlan::binary(url))
    }

    fn url(&self, segments: &[&str]) -> WorkerResult<Url> {
        if let Some(empty) = segments.iter().position(|segment| segment.is_empty()) {
            return Err(WorkerError::InvalidRequest(format!(
                "empty path segment at position {empty}"
            )));
        }
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|()| WorkerError::InvalidRequest("base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// A string query is appended verbatim; an object query becomes one pair per field.
fn append_query(url: &mut Url, query: Option<&Value>) {
    match query {
        Some(Value::String(raw)) => {
            let raw = raw.trim_start_matches('?');
            if raw.is_empty() {
                return;
            }
            let combined = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{raw}"),
                _ => raw.to_string(),
            };
            url.set_query(Some(&combined));
        }
        Some(Value::Object(fields)) if !fields.is_empty() => {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in fields {
                match value {
                    Value::Null => {}
                    Value::String(text) => {
                        pairs.append_pair(key, text);
                    }
                    other => {
                        pairs.append_pair(key, &other.to_string());
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoints() -> Endpoints {
        Endpoints::new("https://assets.test/api/v2/").expect("base")
    }

    fn plan(message: HostMessage) -> FetchPlan {
        endpoints().plan(&message).expect("plan")
    }

    #[test_timeout::timeout]
    fn scene_reads_text() {
        let plan = plan(HostMessage::GetScene {
            scene_id: "s1".into(),
        });
        assert_eq!(plan.request.url.as_str(), "https://assets.test/api/v2/scenes/s1");
        assert_eq!(plan.request.kind, ResponseKind::Text);
        assert!(!plan.is_initial);
        assert_eq!(
            plan.delivery(),
            Delivery {
                is_initial: false,
                kind: ResponseKind::Text
            }
        );
    }

    #[test_timeout::timeout]
    fn base_without_trailing_slash_is_extended() {
        let endpoints = Endpoints::new("https://assets.test/api").expect("base");
        let plan = endpoints
            .plan(&HostMessage::GetViewGroups {
                scene_id: "s1".into(),
                view_group_id: Some("g 1".into()),
            })
            .expect("plan");
        assert_eq!(
            plan.request.url.as_str(),
            "https://assets.test/api/scenes/s1/viewGroups/g%201"
        );
        assert_eq!(plan.request.kind, ResponseKind::Text);
    }

    #[test_timeout::timeout]
    fn view_carries_query_and_initial_flag() {
        let plan = plan(HostMessage::GetView {
            scene_id: "s1".into(),
            view_id: "v1".into(),
            query: Some(json!("?lod=2")),
            sids: Some(vec!["a".into(), "b".into()]),
            is_initial: Some(true),
            is_partial_tree: Some(true),
        });
        assert_eq!(
            plan.request.url.as_str(),
            "https://assets.test/api/v2/scenes/s1/views/v1?lod=2&sids=a%2Cb&partialTree=true"
        );
        assert!(plan.is_initial);
        assert_eq!(plan.request.kind, ResponseKind::Binary);
    }

    #[test_timeout::timeout]
    fn id_lists_are_comma_joined() {
        let plan = plan(HostMessage::GetMesh {
            scene_id: "s1".into(),
            mesh_ids: vec!["m1".into(), "m2".into()],
        });
        assert_eq!(
            plan.request.url.as_str(),
            "https://assets.test/api/v2/scenes/s1/meshes?ids=m1%2Cm2&content=boxes"
        );

        let err = endpoints()
            .plan(&HostMessage::GetMaterial {
                scene_id: "s1".into(),
                material_ids: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, WorkerError::InvalidRequest(_)));
    }

    #[test_timeout::timeout]
    fn image_path_follows_owner() {
        let by_material = plan(HostMessage::GetImage {
            scene_id: Some("s1".into()),
            material_id: Some("mat".into()),
            view_id: Some("v1".into()),
            image_id: "img".into(),
        });
        assert_eq!(
            by_material.request.url.path(),
            "/api/v2/scenes/s1/materials/mat/images/img"
        );

        let by_view = plan(HostMessage::GetImage {
            scene_id: Some("s1".into()),
            material_id: None,
            view_id: Some("v1".into()),
            image_id: "img".into(),
        });
        assert_eq!(by_view.request.url.path(), "/api/v2/scenes/s1/views/v1/images/img");

        let orphan = endpoints().plan(&HostMessage::GetImage {
            scene_id: None,
            material_id: None,
            view_id: None,
            image_id: "img".into(),
        });
        assert!(orphan.is_err());
    }

    #[test_timeout::timeout]
    fn object_query_becomes_pairs() {
        let plan = plan(HostMessage::GetViewAnimations {
            scene_id: "s1".into(),
            view_id: "v1".into(),
            query: Some(json!({"start": 0, "track": "main"})),
        });
        assert_eq!(plan.request.url.query(), Some("start=0&track=main"));
    }

    #[test_timeout::timeout]
    fn control_messages_have_no_endpoint() {
        assert!(endpoints().plan(&HostMessage::Close).is_err());
        assert!(Endpoints::new("not a url").is_err());
        assert!(Endpoints::new("mailto:ops@assets.test").is_err());
    }
}
