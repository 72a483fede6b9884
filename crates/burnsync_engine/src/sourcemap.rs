//! Packaging of built content and its source map into payloads.

use crate::config::SourcemapMode;
use crate::types::{ChangeNotification, Payload, PushTarget};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};

const MAPPING_URL_PREFIX: &str = "\n//# sourceMappingURL=";

/// Produces the payloads to push for one target of `notification`.
///
/// The script payload always comes first; a `.map` payload follows when
/// the mode delivers source maps as separate files.
pub fn package(
    target: &PushTarget,
    notification: &ChangeNotification,
    mode: SourcemapMode,
) -> Vec<(PushTarget, Payload)> {
    let content = notification.built_content.clone();
    let Some(map) = notification.source_map.clone() else {
        return vec![(target.clone(), Payload::script(content))];
    };

    match mode {
        SourcemapMode::Off => vec![(target.clone(), Payload::script(content))],
        SourcemapMode::Inline => {
            let url = format!(
                "data:application/json;base64,{}",
                STANDARD.encode(&map)
            );
            vec![(target.clone(), Payload::script(append_mapping_url(&content, &url)))]
        }
        SourcemapMode::Separate => {
            let map_target = map_target(target);
            let url = format!("{}.map", basename(&target.filename));
            vec![
                (target.clone(), Payload::script(append_mapping_url(&content, &url))),
                (map_target, Payload::sourcemap(map)),
            ]
        }
        SourcemapMode::Hidden => vec![
            (target.clone(), Payload::script(content)),
            (map_target(target), Payload::sourcemap(map)),
        ],
    }
}

fn map_target(target: &PushTarget) -> PushTarget {
    PushTarget::new(format!("{}.map", target.filename), target.server.clone())
}

fn basename(filename: &str) -> &str {
    filename.rsplit('/').next().unwrap_or(filename)
}

fn append_mapping_url(content: &Bytes, url: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(content.len() + MAPPING_URL_PREFIX.len() + url.len() + 1);
    buf.put_slice(content);
    buf.put_slice(MAPPING_URL_PREFIX.as_bytes());
    buf.put_slice(url.as_bytes());
    buf.put_u8(b'\n');
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change() -> ChangeNotification {
        ChangeNotification::new("src/lib/a.ts", "export {};").with_source_map(r#"{"version":3}"#)
    }

    fn target() -> PushTarget {
        PushTarget::new("/lib/a.js", "home")
    }

    #[test]
    fn without_map_only_script_is_pushed() {
        let n = ChangeNotification::new("src/a.ts", "x");
        let out = package(&target(), &n, SourcemapMode::Separate);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1, Payload::script("x"));
    }

    #[test]
    fn off_discards_map() {
        let out = package(&target(), &change(), SourcemapMode::Off);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].1.text(), "export {};");
    }

    #[test]
    fn inline_embeds_data_url() {
        let out = package(&target(), &change(), SourcemapMode::Inline);
        assert_eq!(out.len(), 1);
        let text = out[0].1.text();
        let encoded = STANDARD.encode(r#"{"version":3}"#);
        assert!(text.starts_with("export {};\n//# sourceMappingURL=data:application/json;base64,"));
        assert!(text.trim_end().ends_with(&encoded));
    }

    #[test]
    fn separate_pushes_map_file() {
        let out = package(&target(), &change(), SourcemapMode::Separate);
        assert_eq!(out.len(), 2);
        assert!(out[0].1.text().contains("//# sourceMappingURL=a.js.map"));
        assert_eq!(out[1].0, PushTarget::new("/lib/a.js.map", "home"));
        assert!(out[1].1.sourcemap);
    }

    #[test]
    fn hidden_pushes_map_without_reference() {
        let out = package(&target(), &change(), SourcemapMode::Hidden);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].1.text(), "export {};");
        assert!(out[1].1.sourcemap);
    }
}
