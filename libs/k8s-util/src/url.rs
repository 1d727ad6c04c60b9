/// Collapse a request path into a bounded-cardinality metric label by
/// replacing object names and namespaces with placeholders, following the
/// grouping rules of the Kubernetes API surface (`/api/<version>/...` for the
/// core group, `/apis/<group>/<version>/...` for named groups).
pub fn template_path(path: &str, base_path: Option<&str>) -> String {
    let (base, rest) = match base_path {
        Some(base) if path.starts_with(base) => (base.trim_end_matches('/'), &path[base.len()..]),
        _ => ("", path),
    };
    let rest = rest.split('?').next().unwrap_or_default();
    let mut segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    if segments.len() <= 2 {
        return path.to_string();
    }
    let index = match segments[0] {
        "api" => 2,
        "apis" => 3,
        _ => return "/{prefix}".to_string(),
    };
    if segments.len() <= index {
        return path.to_string();
    }

    const SUBRESOURCES: [&str; 3] = ["status", "scale", "finalize"];
    let tail_len = segments.len() - index;
    let namespaced = segments[index] == "namespaces";
    let named_subresource = tail_len == 3 && SUBRESOURCES.contains(&segments[index + 2]);
    if namespaced {
        if tail_len >= 2 {
            segments[index + 1] = "{namespace}";
        }
        if tail_len >= 4 {
            segments[index + 3] = "{name}";
        }
    } else if tail_len == 2 || named_subresource {
        segments[index + 1] = "{name}";
    }

    format!("{}/{}", base, segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_paths_pass_through() {
        assert_eq!(template_path("/", None), "/");
        assert_eq!(template_path("/api/v1", None), "/api/v1");
    }

    #[test]
    fn core_group_resource_list_is_untouched() {
        assert_eq!(template_path("/api/v1/pods", None), "/api/v1/pods");
    }

    #[test]
    fn core_group_named_object() {
        assert_eq!(
            template_path("/api/v1/nodes/ip-10-0-0-1", None),
            "/api/v1/nodes/{name}"
        );
    }

    #[test]
    fn cluster_scoped_custom_resource() {
        assert_eq!(
            template_path("/apis/scaling.example.com/v1/nodeclaims/workers-h7x2k", None),
            "/apis/scaling.example.com/v1/nodeclaims/{name}"
        );
    }

    #[test]
    fn cluster_scoped_status_subresource() {
        assert_eq!(
            template_path(
                "/apis/scaling.example.com/v1/nodepools/workers/status",
                None
            ),
            "/apis/scaling.example.com/v1/nodepools/{name}/status"
        );
    }

    #[test]
    fn namespaced_resource_without_name() {
        assert_eq!(
            template_path("/apis/apps/v1/namespaces/kube-system/daemonsets", None),
            "/apis/apps/v1/namespaces/{namespace}/daemonsets"
        );
    }

    #[test]
    fn namespaced_named_object() {
        assert_eq!(
            template_path("/apis/apps/v1/namespaces/kube-system/daemonsets/proxy", None),
            "/apis/apps/v1/namespaces/{namespace}/daemonsets/{name}"
        );
    }

    #[test]
    fn query_strings_are_dropped() {
        assert_eq!(
            template_path("/api/v1/pods?fieldSelector=spec.nodeName%3Dn0", None),
            "/api/v1/pods"
        );
    }

    #[test]
    fn unknown_prefix_collapses() {
        assert_eq!(template_path("/unknown/group/resource", None), "/{prefix}");
    }

    #[test]
    fn base_path_is_preserved() {
        assert_eq!(
            template_path(
                "/base/path/api/v1/nodes/ip-10-0-0-1",
                Some("/base/path")
            ),
            "/base/path/api/v1/nodes/{name}"
        );
    }
}
