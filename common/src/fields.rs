/// Raw `key<sep>value` pairs split out of a `;`-delimited payload.
///
/// Keys keep their original case. When a key appears more than once only the
/// first occurrence is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields<'a> {
    entries: Vec<(&'a str, &'a str)>,
}

impl<'a> Fields<'a> {
    pub fn tokenize(input: &'a str, separator: char) -> Self {
        let mut entries: Vec<(&'a str, &'a str)> = Vec::new();

        for segment in input.split(';') {
            let Some((key, value)) = segment.split_once(separator) else {
                continue;
            };

            let key = key.trim();
            if key.is_empty() || entries.iter().any(|(existing, _)| *existing == key) {
                continue;
            }

            entries.push((key, value.trim()));
        }

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == key)
            .map(|(_, value)| *value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_segments_on_separator() {
        let fields = Fields::tokenize("TEMP:21;MODE:COOL;", ':');

        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get("TEMP"), Some("21"));
        assert_eq!(fields.get("MODE"), Some("COOL"));
        assert_eq!(fields.get("PRESET"), None);
    }

    #[test]
    fn first_occurrence_wins() {
        let fields = Fields::tokenize("MODE:HEAT;MODE:COOL", ':');
        assert_eq!(fields.get("MODE"), Some("HEAT"));
    }

    #[test]
    fn value_may_contain_separator() {
        let fields = Fields::tokenize("PRESET:a:b;", ':');
        assert_eq!(fields.get("PRESET"), Some("a:b"));
    }

    #[test]
    fn ignores_segments_without_separator_and_trims_whitespace() {
        let fields = Fields::tokenize(" garbage ; TEMP : 19 \n", ':');
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("TEMP"), Some("19"));
    }

    #[test]
    fn empty_input_has_no_fields() {
        assert!(Fields::tokenize("", ':').is_empty());
        assert!(Fields::tokenize(";;;", ':').is_empty());
    }
}
