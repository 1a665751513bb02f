//! Reference patterns.

use regex_lite::Regex;

/// Characters escaped when a filename is embedded in a pattern. The dot is
/// left out on purpose and keeps its wildcard meaning.
const META: &[char] = &[
    '\\', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$', '#', '&', '-', '~',
];

/// Zero or more `./` or `../` segments.
const RELATIVE: &str = r"(?:\.{1,2}/)*";

/// Block anchor suffix, `#^block-id`.
const BLOCK: &str = r"#\^[a-zA-Z0-9_-]+";

/// Escapes regex metacharacters in `filename`, except `.`.
pub fn escape_filename(filename: &str) -> String {
    let mut escaped = String::with_capacity(filename.len() + 8);
    for c in filename.chars() {
        if META.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Builds the single pattern that finds every reference to `filename`.
///
/// Two syntaxes are alternated:
///
/// - `![[dir/name#^block|alias]]`: embed marker, folder prefix, block
///   anchor and alias all optional.
/// - `![label](./dir/name#^block)`: embed marker, relative or folder
///   prefix and block anchor optional.
///
/// Named groups: `wblock`, `walias` for the first form and `membed`,
/// `mlabel`, `mblock` for the second.
pub fn reference_pattern(filename: &str) -> Result<Regex, regex_lite::Error> {
    let name = escape_filename(filename);

    let wikilink = format!(
        r"!?\[\[{rel}(?:[^\]\[|#/\\]+/)*{name}(?P<wblock>{block})?(?:\|(?P<walias>[^\]]*))?\]\]",
        rel = RELATIVE,
        name = name,
        block = BLOCK,
    );
    let markdown = format!(
        r"(?P<membed>!)?\[(?P<mlabel>[^\]]*)\]\({rel}(?:[^\]\[()/\\]+/)*{name}(?P<mblock>{block})?\)",
        rel = RELATIVE,
        name = name,
        block = BLOCK,
    );

    Regex::new(&format!("{}|{}", wikilink, markdown))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(filename: &str, text: &str) -> Vec<String> {
        let re = reference_pattern(filename).unwrap();
        re.find_iter(text).map(|m| m.as_str().to_string()).collect()
    }

    #[test]
    fn test_escape_keeps_dot() {
        assert_eq!(escape_filename("a+b (1).png"), r"a\+b \(1\).png");
        assert_eq!(escape_filename("x[y]-z.jpg"), r"x\[y\]\-z.jpg");
    }

    #[test]
    fn test_wikilink_forms() {
        let text = "a [[photo.png]] b ![[photo.png|Alias]] c [[img/photo.png#^blk-1]] d \
                    [[./photo.png]] e [[../../img/photo.png|a]] f";
        assert_eq!(
            matches("photo.png", text),
            vec![
                "[[photo.png]]",
                "![[photo.png|Alias]]",
                "[[img/photo.png#^blk-1]]",
                "[[./photo.png]]",
                "[[../../img/photo.png|a]]",
            ]
        );
    }

    #[test]
    fn test_markdown_forms() {
        let text = "![](photo.png) [see](./img/photo.png) ![x](../../photo.png#^b)";
        assert_eq!(
            matches("photo.png", text),
            vec!["![](photo.png)", "[see](./img/photo.png)", "![x](../../photo.png#^b)"]
        );
    }

    #[test]
    fn test_does_not_match_other_names() {
        let text = "[[my photo.png]] [[photo.png.bak]] ![](https://cdn.example/photo.png)";
        assert!(matches("photo.png", text).is_empty());
    }

    #[test]
    fn test_metacharacters_in_filename() {
        let text = "![[shot (1)+final.jpg]]";
        assert_eq!(matches("shot (1)+final.jpg", text), vec![text]);
    }

    #[test]
    fn test_dot_is_a_wildcard() {
        assert_eq!(matches("photo.png", "[[photoXpng]]"), vec!["[[photoXpng]]"]);
    }

    #[test]
    fn test_named_groups() {
        let re = reference_pattern("a.png").unwrap();
        let caps = re.captures("![[a.png#^k|Shown]]").unwrap();
        assert_eq!(caps.name("wblock").unwrap().as_str(), "#^k");
        assert_eq!(caps.name("walias").unwrap().as_str(), "Shown");

        let caps = re.captures("![label](a.png)").unwrap();
        assert!(caps.name("membed").is_some());
        assert_eq!(caps.name("mlabel").unwrap().as_str(), "label");
        assert!(caps.name("mblock").is_none());
    }
}
