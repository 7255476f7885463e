use super::{
    family::collect_families,
    Label,
    Labels,
    MetricFamilies,
    Type,
    Value,
    ValueType,
};
use std::{
    io::Read,
    ops::Range,
};
use tracing::debug;
use winnow::{
    ascii::{
        digit1,
        escaped,
        newline,
        space0,
        space1,
        Caseless,
    },
    combinator::{
        alt,
        cut_err,
        delimited,
        eof,
        opt,
        preceded,
        repeat,
        separated,
        terminated,
    },
    error::ParseError,
    stream::{
        Accumulate,
        AsBStr,
        AsChar,
    },
    token::{
        none_of,
        one_of,
        tag,
        take_till,
        take_while,
    },
    PResult,
    Parser,
};

/// Parse a valid prometheus `metric_name` or `label_name`.
fn name_parser(input: &mut &str) -> PResult<String> {
    let start_group = ('a'..='z', 'A'..='Z', '_', ':');
    let rest_group = ('a'..='z', 'A'..='Z', '0'..='9', '_', ':');
    (one_of(start_group), take_while(0.., rest_group))
        .map(|(ch, rest)| format!("{ch}{rest}"))
        .parse_next(input)
}

/// Resolve the escape sequences of a label value (`quotes` set) or of a HELP text.
///
/// Label values escape `\\`, `\"` and `\n`. HELP texts only escape `\\` and `\n`.
/// Unknown sequences are kept as written.
fn unescape(raw: &str, quotes: bool) -> String {
    let mut unescaped = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            unescaped.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => unescaped.push('\n'),
            Some('\\') => unescaped.push('\\'),
            Some('"') if quotes => unescaped.push('"'),
            Some(other) => {
                unescaped.push('\\');
                unescaped.push(other);
            }
            None => unescaped.push('\\'),
        }
    }
    unescaped
}

/// Parse a valid prometheus label value, returning it unescaped.
///
/// Examples:
///
/// * `"Test"`
/// * `"Some value"`
fn parse_label_value(input: &mut &str) -> PResult<String> {
    let escaped = escaped(none_of(br#""\"#), '\\', one_of(br#""n\"#));
    preceded('\"', cut_err(terminated(escaped, '\"')))
        .map(|raw: &str| unescape(raw, true))
        .parse_next(input)
}

/// Parse a Prometheus label key value pair.
///
/// Examples:
///
/// * `key1="value1"`
/// * `key = "value"`
/// * `key= "val"`
fn label_key_value_parser(input: &mut &str) -> PResult<(String, String)> {
    let key = name_parser.parse_next(input)?;
    let _ = (space0, '=', space0).parse_next(input)?;
    let val = parse_label_value.parse_next(input)?;
    Ok((key, val))
}

// Enable us to parse the collection of key value pairs into the `Labels` structure
impl Accumulate<(String, String)> for Labels {
    fn initial(capacity: Option<usize>) -> Self {
        Vec::with_capacity(capacity.unwrap_or(4)).into()
    }

    fn accumulate(&mut self, acc: (String, String)) {
        self.push(Label::new(acc.0, acc.1));
    }
}

/// Parses a list of labels delimited by braces
///
/// Examples:
/// * `{key1="value1",key2="value2"}`
/// * `{key1="value1", key2 = "value2"}`
/// * `{ key1="value1", key2 = "value2" }`
/// * `{key1="value1",}`
fn labels_parser(input: &mut &str) -> PResult<Labels> {
    let separator = (space0, ',', space0);
    let list = separated(1.., label_key_value_parser, separator);
    let start_delimiter = ("{", space0);
    let end_delimiter = (space0, opt(','), space0, "}");
    let mut labels = delimited(start_delimiter, list, end_delimiter);
    labels.parse_next(input)
}

/// Parse a valid Prometheus float value (+Inf, -Inf, NaN, ...)
fn float_value_parser(input: &mut &str) -> PResult<f64> {
    let number = (
        opt(one_of(['+', '-'])),
        alt((
            (digit1, opt(('.', opt(digit1)))).map(|_| ()),
            ('.', digit1).map(|_| ()),
        )),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), cut_err(digit1))),
    )
        .recognize();
    let nan = tag(Caseless("nan"));
    let inf = alt((tag(Caseless("inf")), tag(Caseless("+inf"))));
    let neg_inf = tag(Caseless("-inf"));
    alt((number, nan, inf, neg_inf))
        .parse_to()
        .parse_next(input)
}

/// Parse a valid Prometheus int value
fn int_value_parser(input: &mut &str) -> PResult<i64> {
    let prefix = opt(one_of(['+', '-']));
    (prefix, digit1).recognize().parse_to().parse_next(input)
}

/// Validate that the next character is either a new line or an EoF, returning an error if not
fn new_line_or_eof_parser(input: &mut &str) -> PResult<()> {
    alt((eof.map(|_| ()), newline.map(|_| ()))).parse_next(input)
}

/// Parse the rest of line until either EoF or NewLine (Parsing & ignoring the newline character)
fn rest_of_the_line_parser<'a>(input: &mut &'a str) -> PResult<&'a str> {
    let rest = preceded(space0, take_till(0.., AsChar::is_newline)).parse_next(input)?;
    new_line_or_eof_parser.parse_next(input)?;
    Ok(rest)
}

/// The four possible types of lines in the Prometheus exposition format
#[derive(Debug, Clone)]
enum Line {
    Empty,
    Comment(String),
    Help {
        name: String,
        desc: String,
    },
    Type {
        name: String,
        kind: Type,
    },
    Sample {
        name: String,
        labels: Labels,
        value: Value,
    },
}

/// Parse a Prometheus comment line.
///
/// A comment is anything that starts with #.
///
/// Example:
/// * `# This is a comment`
fn comment_line_parser(input: &mut &str) -> PResult<Line> {
    preceded((space0, tag("#"), space0), rest_of_the_line_parser)
        .map(|v| Line::Comment(v.into()))
        .parse_next(input)
}

/// Parse a Prometheus HELP line.
///
/// A HELP line is a comment that starts with #, followed by "HELP", followed by the name of
/// the metric, followed by its description. The description may be empty.
///
/// Example:
/// * `# HELP http_request_duration_seconds A histogram of the request duration.`
fn help_line_parser(input: &mut &str) -> PResult<Line> {
    let ignored = (space0, tag("#"), space0, tag("HELP"), space1);
    let name = preceded(ignored, name_parser).parse_next(input)?;
    let desc = rest_of_the_line_parser
        .map(|desc| unescape(desc, false))
        .parse_next(input)?;
    Ok(Line::Help { name, desc })
}

/// Parse a Prometheus TYPE line.
///
/// A TYPE line is a comment that starts with #, followed by "TYPE", followed by the name of
/// the metric, followed by its type (see [`Type`]).
///
/// Example:
/// * `# TYPE http_request_duration_seconds histogram`
fn type_line_parser(input: &mut &str) -> PResult<Line> {
    let ignored = (space0, tag("#"), space0, tag("TYPE"), space1);
    let name = preceded(ignored, name_parser).parse_next(input)?;
    let kind = rest_of_the_line_parser.parse_to().parse_next(input)?;
    Ok(Line::Type { name, kind })
}

/// Parse a Prometheus metric line.
///
/// Returns:
/// The metric name and the `Value`
///
/// Examples:
/// * `data_sent:bytes{th_id="worker_0",type="duplex"} 1395`
/// * `metric_without_timestamp_and_labels 12.47`
/// * `metric_without_timestamp_and_labels 12.47 -1`
/// * `http_request_duration_seconds_count 144320`
fn sample_line_parser(input: &mut &str) -> PResult<Line> {
    let name = name_parser.parse_next(input)?;
    // Parse the labels, if they exist, otherwise return an empty Vec.
    let labels = preceded(space0, opt(labels_parser))
        .parse_next(input)?
        .unwrap_or_default();
    let value = preceded(space0, float_value_parser).parse_next(input)?;
    let timestamp = preceded(space0, opt(int_value_parser)).parse_next(input)?;
    // Expect the line to end after
    (space0, new_line_or_eof_parser).parse_next(input)?;
    // The value type is chosen as default here, and is modified based on the type and the name
    // later
    let value = Value::new(ValueType::Sample, value, timestamp);
    Ok(Line::Sample {
        name,
        labels,
        value,
    })
}

/// Parse an empty line. For completeness.
fn empty_line_parser(input: &mut &str) -> PResult<Line> {
    (space0, newline).map(|_| Line::Empty).parse_next(input)
}

/// Parse a Prometheus metric.
///
/// Composed of one of the four possible metric lines
fn metric_line_parser(input: &mut &str) -> PResult<Line> {
    alt((
        help_line_parser,
        type_line_parser,
        comment_line_parser,
        sample_line_parser,
        empty_line_parser,
    ))
    .parse_next(input)
}

/// Parse a complete scrape into its low level composing lines.
///
/// This function is used by the higher level parser to parse each line in the scrape into
/// a list of lines. An empty scrape has no lines, and trailing blanks without a final newline
/// are ignored.
/// Each metric block will later be composed of multiple lines.
fn scrape_lines_parser(input: &mut &str) -> PResult<Vec<Line>> {
    terminated(repeat(0.., metric_line_parser), space0).parse_next(input)
}

/// The errors that can result from failure to parse.
/// Either failure to read the input, failure to parse the lines, or failure to assemble the
/// metric families.
#[derive(Debug, Clone, derive_more::Display)]
pub enum ScrapeParseError {
    /// The input could not be read as UTF-8 text
    #[display(fmt = "failed to read exposition text: {_0}")]
    Read(String),
    /// Error occurred at the line parsing stage
    #[display(fmt = "failed to parse exposition text:\n{_0}")]
    Parse(String),
    /// Failed to coalesce some lines into metric families
    #[display(fmt = "failed to assemble metric families{}", "error_list(_0)")]
    Collect(Vec<MetricError>),
}

/// One indented error per line.
fn error_list(errors: &[MetricError]) -> String {
    errors.iter().map(|error| format!("\n  {error}")).collect()
}

impl<I, E> From<ParseError<I, E>> for ScrapeParseError
where
    I: AsBStr,
    E: std::fmt::Display,
{
    fn from(value: ParseError<I, E>) -> Self {
        Self::Parse(value.to_string())
    }
}

impl std::error::Error for ScrapeParseError {}

/// A failure to assemble multiple lines into a metric family.
/// Composed of the line the error occurred and the error message.
#[derive(Debug, Clone, derive_more::Constructor, derive_more::Display)]
#[display(fmt = "line {}: {reason}", "line_no.end")]
pub struct MetricError {
    /// The line number where the error occurred
    pub line_no: Range<usize>,
    /// The error string
    pub reason: String,
}

impl MetricError {
    /// An error attached to the single, zero based, line `line_no`.
    pub(crate) fn at_line(line_no: usize, reason: String) -> Self {
        Self::new(line_no..line_no + 1, reason)
    }
}

/// A sample line that belongs to a metric block.
#[derive(Debug, Clone)]
pub(crate) struct RawSample {
    pub labels: Labels,
    pub value: Value,
    /// Zero based line of the sample in the scrape
    pub line_no: usize,
}

/// Consecutive lines of a scrape that describe the same metric.
///
/// A family whose samples are not written next to each other spans several blocks. A HELP or
/// TYPE line that no sample follows makes a block without samples.
#[derive(Debug, Clone)]
pub(crate) struct MetricBlock {
    /// The type, if a TYPE line was given
    pub kind: Option<Type>,
    /// A comment line above the metric which does start with HELP
    pub help_desc: Option<String>,
    /// The name of the metric, excluding any suffix.
    pub name: String,
    /// Zero based line the block starts at
    pub line_no: usize,
    /// The data
    pub samples: Vec<RawSample>,
}

impl MetricBlock {
    fn new(
        kind: Option<Type>,
        help_desc: Option<String>,
        name: String,
        line_no: usize,
        samples: Vec<RawSample>,
    ) -> Self {
        Self {
            kind,
            help_desc,
            name,
            line_no,
            samples,
        }
    }
}

#[derive(Debug, Clone)]
enum MetricState {
    // Initial state
    Start,
    // From this point in the parsing, we have the metric name
    Help(String),
    Type(String),
    Sample(String),
}

/// Assemble metric blocks from the scrape lines
#[derive(Debug)]
struct MetricAssembler {
    /// Lines to process
    lines: Vec<Line>,
    /// Current line - for debugging
    current: usize,
}

impl MetricAssembler {
    fn new(mut lines: Vec<Line>) -> Self {
        // So we can always pop the last line
        lines.reverse();
        Self { lines, current: 0 }
    }

    /// Return the last line to the lines buffer
    fn rewind(&mut self, put_back: Line) {
        // put back the new line
        self.lines.push(put_back);
        // rewind the line pointer
        self.current -= 1;
    }

    /// The zero based range of the line that was just popped
    fn location(&self) -> Range<usize> {
        self.current - 1..self.current
    }

    fn sample(&self, labels: Labels, value: Value) -> RawSample {
        RawSample {
            labels,
            value,
            line_no: self.current - 1,
        }
    }
}

impl Iterator for MetricAssembler {
    /// Either the parsed block or the metric error
    type Item = Result<MetricBlock, MetricError>;

    /// Assemble a single metric block from the remaining scrape lines
    fn next(&mut self) -> Option<Self::Item> {
        let mut maybe_kind = None;
        let mut maybe_desc = None;
        let mut samples = Vec::new();
        let mut start = 0;
        let mut state = MetricState::Start;

        loop {
            self.current += 1;
            state = match (state, self.lines.pop()) {
                // Skip empty/comment lines
                (state, Some(Line::Empty | Line::Comment(_))) => state,
                // Exit case
                (MetricState::Start, None) => {
                    return None;
                }
                (MetricState::Start, Some(Line::Help { name, desc })) => {
                    start = self.current - 1;
                    maybe_desc = Some(desc);
                    MetricState::Help(name)
                }
                (MetricState::Start, Some(Line::Type { name, kind })) => {
                    start = self.current - 1;
                    maybe_kind = Some(kind);
                    MetricState::Type(name)
                }
                (MetricState::Help(prev_name), Some(Line::Help { name, desc })) => {
                    let repeated = prev_name == name;
                    let location = self.location();
                    self.rewind(Line::Help { name, desc });
                    if repeated {
                        let err_msg = format!("Metric {prev_name} HELP section appeared multiple times");
                        return Some(Err(MetricError::new(location, err_msg)));
                    }
                    // No samples
                    let block = MetricBlock::new(maybe_kind, maybe_desc, prev_name, start, samples);
                    return Some(Ok(block));
                }
                (MetricState::Help(prev_name), Some(Line::Type { name, kind })) => {
                    match prev_name == name {
                        true => {
                            maybe_kind = Some(kind);
                            MetricState::Type(name)
                        }
                        false => {
                            self.rewind(Line::Type { name, kind });
                            let block =
                                MetricBlock::new(maybe_kind, maybe_desc, prev_name, start, samples);
                            return Some(Ok(block));
                        }
                    }
                }
                (MetricState::Type(prev_name), Some(Line::Type { name, kind })) => {
                    let repeated = prev_name == name;
                    let location = self.location();
                    self.rewind(Line::Type { name, kind });
                    if repeated {
                        let err_msg = format!("Metric {prev_name} TYPE section appeared multiple times");
                        return Some(Err(MetricError::new(location, err_msg)));
                    }
                    let block = MetricBlock::new(maybe_kind, maybe_desc, prev_name, start, samples);
                    return Some(Ok(block));
                }
                (MetricState::Type(prev_name), Some(Line::Help { name, desc })) => {
                    match prev_name == name {
                        // HELP after TYPE is out of order, but accepted
                        true => {
                            // leave the state as is
                            maybe_desc = Some(desc);
                            MetricState::Help(prev_name)
                        }
                        false => {
                            self.rewind(Line::Help { name, desc });
                            let block =
                                MetricBlock::new(maybe_kind, maybe_desc, prev_name, start, samples);
                            return Some(Ok(block));
                        }
                    }
                }
                (MetricState::Type(prev_name) | MetricState::Help(prev_name), None) => {
                    let block = MetricBlock::new(maybe_kind, maybe_desc, prev_name, start, samples);
                    return Some(Ok(block));
                }
                (
                    MetricState::Start,
                    Some(Line::Sample {
                        name,
                        labels,
                        value,
                    }),
                ) => {
                    start = self.current - 1;
                    samples.push(self.sample(labels, value));
                    MetricState::Sample(name)
                }
                (
                    MetricState::Type(prev_name) | MetricState::Help(prev_name),
                    Some(Line::Sample {
                        name,
                        labels,
                        mut value,
                    }),
                ) => {
                    match names_are_equal(&prev_name, &name, maybe_kind) {
                        LinesStatus::Equal => {}
                        LinesStatus::NewIsSum => {
                            value.value_type = ValueType::Sum;
                        }
                        LinesStatus::NewIsCount => {
                            value.value_type = ValueType::Count;
                        }
                        LinesStatus::NotEqual => {
                            // The samples belong to another metric
                            self.rewind(Line::Sample {
                                name,
                                labels,
                                value,
                            });
                            let block =
                                MetricBlock::new(maybe_kind, maybe_desc, prev_name, start, samples);
                            return Some(Ok(block));
                        }
                    }
                    samples.push(self.sample(labels, value));
                    MetricState::Sample(prev_name)
                }
                (
                    MetricState::Sample(prev_name),
                    Some(Line::Sample {
                        name,
                        labels,
                        mut value,
                    }),
                ) => {
                    match names_are_equal(&prev_name, &name, maybe_kind) {
                        LinesStatus::Equal => {}
                        LinesStatus::NewIsSum => {
                            value.value_type = ValueType::Sum;
                        }
                        LinesStatus::NewIsCount => {
                            value.value_type = ValueType::Count;
                        }
                        LinesStatus::NotEqual => {
                            // It's the start of a new metric
                            self.rewind(Line::Sample {
                                name,
                                labels,
                                value,
                            });
                            let block =
                                MetricBlock::new(maybe_kind, maybe_desc, prev_name, start, samples);
                            return Some(Ok(block));
                        }
                    }
                    samples.push(self.sample(labels, value));
                    MetricState::Sample(prev_name)
                }
                (MetricState::Sample(prev_name), Some(Line::Help { name, desc })) => {
                    // The metric ended
                    self.rewind(Line::Help { name, desc });
                    let block = MetricBlock::new(maybe_kind, maybe_desc, prev_name, start, samples);
                    return Some(Ok(block));
                }
                (MetricState::Sample(prev_name), Some(Line::Type { name, kind })) => {
                    // The metric ended
                    self.rewind(Line::Type { name, kind });
                    let block = MetricBlock::new(maybe_kind, maybe_desc, prev_name, start, samples);
                    return Some(Ok(block));
                }
                // Last metric
                (MetricState::Sample(name), None) => {
                    let block = MetricBlock::new(maybe_kind, maybe_desc, name, start, samples);
                    return Some(Ok(block));
                }
            };
        }
    }
}

/// The status of comparing two adjacent line names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinesStatus {
    Equal,
    NewIsSum,
    NewIsCount,
    NotEqual,
}

/// Whether the previous and the current lines belong to the same metric
///
/// Assumption: `prev_name` is always the base name. Without the suffix "_bucket", "_sum",
/// "_count" (or "_gsum", "_gcount" for gauge histograms, "_info" for info metrics).
pub(crate) fn names_are_equal(
    prev_name: &str,
    cur_name: &str,
    maybe_kind: Option<Type>,
) -> LinesStatus {
    if prev_name == cur_name {
        return LinesStatus::Equal;
    }
    let Some(suffix) = cur_name.strip_prefix(prev_name) else {
        return LinesStatus::NotEqual;
    };
    match (maybe_kind, suffix) {
        (Some(Type::Histogram | Type::GaugeHistogram), "_bucket") => LinesStatus::Equal,
        (Some(Type::Info), "_info") => LinesStatus::Equal,
        (Some(Type::Histogram | Type::Summary), "_sum") => LinesStatus::NewIsSum,
        (Some(Type::GaugeHistogram), "_gsum") => LinesStatus::NewIsSum,
        (Some(Type::Histogram | Type::Summary), "_count") => LinesStatus::NewIsCount,
        (Some(Type::GaugeHistogram), "_gcount") => LinesStatus::NewIsCount,
        _ => LinesStatus::NotEqual,
    }
}

/// Parse the text of a scrape into metric blocks and a set of errors.
/// The stages:
/// * Parses each line in the scrape into a valid Prometheus metric line.
/// * Compose multiple lines into a metric block.
pub(crate) fn parse_blocks(input: &str) -> (Vec<MetricBlock>, Option<ScrapeParseError>) {
    let lines = match scrape_lines_parser.parse(input) {
        Ok(lines) => lines,
        Err(e) => return (Vec::new(), Some(e.into())),
    };
    let mut blocks = Vec::new();
    let mut errors = Vec::new();
    for item in MetricAssembler::new(lines) {
        match item {
            Ok(block) => blocks.push(block),
            Err(metric_error) => errors.push(metric_error),
        }
    }
    let maybe_error = (!errors.is_empty()).then_some(ScrapeParseError::Collect(errors));
    (blocks, maybe_error)
}

/// Parse the text of a scrape into metric families keyed by name.
///
/// Any syntax error, or any error assembling the families, fails the whole scrape.
pub fn parse_families(input: &str) -> Result<MetricFamilies, ScrapeParseError> {
    let (blocks, maybe_error) = parse_blocks(input);
    if let Some(error) = maybe_error {
        return Err(error);
    }
    let families = collect_families(blocks).map_err(ScrapeParseError::Collect)?;
    debug!(families = families.len(), "parsed exposition text");
    Ok(families)
}

/// Read a whole scrape from `reader` and parse it with [`parse_families`].
pub fn parse_reader<R: Read>(mut reader: R) -> Result<MetricFamilies, ScrapeParseError> {
    let mut input = String::new();
    reader
        .read_to_string(&mut input)
        .map_err(|e| ScrapeParseError::Read(e.to_string()))?;
    parse_families(&input)
}

#[cfg(test)]
mod tests {
    use super::{
        comment_line_parser,
        empty_line_parser,
        float_value_parser,
        help_line_parser,
        int_value_parser,
        label_key_value_parser,
        labels_parser,
        metric_line_parser,
        name_parser,
        new_line_or_eof_parser,
        parse_blocks,
        parse_families,
        parse_label_value,
        parse_reader,
        rest_of_the_line_parser,
        sample_line_parser,
        scrape_lines_parser,
        type_line_parser,
        Line,
        ScrapeParseError,
    };
    use crate::{
        tests::{
            init_test_logging,
            prepare_test_data,
            EXAMPLE_01,
            NODE_EXPORTER_01,
        },
        Type,
        ValueType,
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tracing::info;
    use winnow::Parser;

    #[test]
    fn test_parse_name_parser() {
        init_test_logging();

        let success_cases = [
            ("key1", "key1"),
            ("a:b:c", "a:b:c"),
            ("d33", "d33"),
            ("a_233:3:", "a_233:3:"),
        ];
        for (expr, expected) in success_cases {
            info!("Testing successful expr: '{expr}'");
            let matched = name_parser.parse(expr).unwrap();
            assert_eq!(matched, expected);
        }
        let error_cases = ["", "112_abc", "a-b", "test with space"];
        for expr in error_cases {
            info!("Testing failure expr: '{expr}'");
            assert!(name_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_label_value_parser() {
        init_test_logging();

        let success_cases = [
            (r#""Test""#, "Test"),
            (
                r#""a string -1234567890 _:@#!""#,
                "a string -1234567890 _:@#!",
            ),
            (r#""""#, ""),
            (
                r#""Cannot find file:\n\"FILE.TXT\"""#,
                "Cannot find file:\n\"FILE.TXT\"",
            ),
            (r#""C:\\DIR\\FILE.TXT""#, r"C:\DIR\FILE.TXT"),
        ];
        for (expr, expected) in success_cases {
            info!("Testing successful expr: '{expr}'");
            let matched = parse_label_value.parse(expr).unwrap();
            assert_eq!(matched, expected);
        }
        let error_cases = ["", "\"", "\"some string"];
        for expr in error_cases {
            info!("Testing failure expr: '{expr}'");
            assert!(parse_label_value.parse(expr).is_err());
        }
    }

    #[test]
    fn test_label_key_value_parser() {
        init_test_logging();

        let success_cases = [
            (r#"key1="Test""#, ("key1", "Test")),
            (r#"key1  = "Test""#, ("key1", "Test")),
            (r#"key1="""#, ("key1", "")),
            (r#"k:_e="@!2334+~`""#, ("k:_e", "@!2334+~`")),
        ];
        for (expr, (key, val)) in success_cases {
            info!("Testing successful expr: '{expr}'");
            let (recv_key, recv_val) = label_key_value_parser.parse(expr).unwrap();
            assert_eq!(key, recv_key);
            assert_eq!(val, recv_val);
        }
        let error_cases = [
            "",
            r#"key1="Test"#,
            r#""key1"="Test""#,
            "key1=",
            r#"key1 "Test""#,
        ];
        for expr in error_cases {
            info!("Testing failure expr: '{expr}'");
            assert!(label_key_value_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_labels_parser() {
        init_test_logging();

        let success_cases = [
            r#"{key1="value1",key2="value2"}"#,
            r#"{key1="value1", key2 = "value2"}"#,
            r#"{ key1="value1",    key2 = "value2" }"#,
            r#"{ key1  =  "value1",    key2 = "value2" }"#,
            r#"{key1="value1",key2="value2",}"#,
        ];
        for expr in success_cases {
            info!("Testing successful expr: '{expr}'");
            let labels = labels_parser.parse(expr).unwrap();
            assert_eq!(labels.len(), 2);
            let mut iter = labels.iter();
            let label = iter.next().unwrap();
            assert_eq!("key1", label.name);
            assert_eq!("value1", label.value);
            let label = iter.next().unwrap();
            assert_eq!("key2", label.name);
            assert_eq!("value2", label.value);
        }

        let error_cases = [
            "",
            "{}",
            r#"{key1="value1",key2="value2""#,
            r#"{bar="#,
        ];
        for expr in error_cases {
            info!("Testing failure expr: '{expr}'");
            assert!(labels_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_int_value_parser() {
        init_test_logging();

        let success_cases = [
            ("0", 0),
            ("1", 1),
            ("-1", -1),
            ("100000", 100000),
            ("-1345555", -1345555),
        ];
        for (expr, val) in success_cases {
            info!("Testing successful expr: '{expr}'");
            let recv_val = int_value_parser.parse(expr).unwrap();
            assert_eq!(val, recv_val);
        }

        let error_cases = ["", "b123"];
        for expr in error_cases {
            info!("Testing failure expr: '{expr}'");
            assert!(int_value_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_float_value_parser() {
        init_test_logging();

        let success_cases = [
            ("0", 0.0),
            ("0.0", 0.0),
            ("1.0", 1.0),
            ("-1.0", -1.0),
            ("Inf", f64::INFINITY),
            ("+Inf", f64::INFINITY),
            ("-Inf", f64::NEG_INFINITY),
            ("1e4", 1.0e4),
            ("NaN", f64::NAN),
            ("nan", f64::NAN),
            ("NAN", f64::NAN),
            ("-1.23e+1", -1.23e+1),
            ("-1.23e-1", -1.23e-1),
            ("+.22", 0.22),
            (".33", 0.33),
        ];
        for (expr, num) in success_cases {
            info!("Testing successful expr: '{expr}'");
            let parsed = float_value_parser.parse(expr).unwrap();
            assert!(parsed == num || (parsed.is_nan() && num.is_nan()));
        }

        let error_cases = ["", "abc", "1e", "--1"];
        for expr in error_cases {
            info!("Testing failure expr: '{expr}'");
            assert!(float_value_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_new_line_or_eof_parser() {
        init_test_logging();

        let success_cases = ["", "\n"];
        for expr in success_cases {
            info!("Testing successful expr: '{expr}'");
            let res = new_line_or_eof_parser.parse(expr);
            assert_eq!(res, Ok(()));
        }

        let error_cases = [" ", "\t", "abc"];
        for expr in error_cases {
            info!("Testing failure expr: '{expr}'");
            let res = new_line_or_eof_parser.parse(expr);
            assert!(res.is_err());
        }
    }

    #[test]
    fn test_rest_of_the_line_parser() {
        init_test_logging();

        let success_cases = [("1\n", "1"), ("   1\n", "1"), ("\n", ""), ("", "")];
        for (expr, expected) in success_cases {
            info!("Testing successful expr: '{expr}'");
            let parsed = rest_of_the_line_parser.parse(expr).unwrap();
            assert_eq!(parsed, expected);
        }

        let error_cases = ["1\n2"];
        for expr in error_cases {
            info!("Testing failure expr: '{expr}'");
            let res = rest_of_the_line_parser.parse(expr);
            assert!(res.is_err());
        }
    }

    #[test]
    fn test_empty_line_parser() {
        init_test_logging();

        let success_cases = ["\n", "   \n", "\t\n"];
        for expr in success_cases {
            info!("Testing successful expr: '{expr}'");
            let res = empty_line_parser.parse(expr);
            assert!(res.is_ok());
        }

        let error_cases = ["", "not-empty\n", "@\n", "     "];
        for expr in error_cases {
            info!("Testing failure expr: '{expr}'");
            let res = empty_line_parser.parse(expr);
            assert!(res.is_err());
        }
    }

    #[test]
    fn test_sample_line_parser_01() {
        init_test_logging();

        let cases = [
            r#"data_sent:bytes{th_id="worker_0",type="duplex"} 1395 -1"#,
            "data_sent:bytes{th_id=\"worker_0\",type=\"duplex\"} 1395 -1\n",
            "data_sent:bytes{th_id=\"worker_0\",type=\"duplex\"} 1395 -1   \n",
            r#"data_sent:bytes { th_id = "worker_0" , type = "duplex" }   1395  -1  "#,
        ];
        for expr in cases {
            info!("Testing successful expr: '{expr}'");
            let (name, labels, value) = match sample_line_parser.parse(expr) {
                Ok(Line::Sample {
                    name,
                    labels,
                    value,
                }) => (name, labels, value),
                res => panic!("Received unexpected {res:?}"),
            };
            assert_eq!(name, "data_sent:bytes");
            assert_eq!(labels.len(), 2);
            let mut iter = labels.iter();
            let label = iter.next().unwrap();
            assert_eq!("th_id", label.name);
            assert_eq!("worker_0", label.value);
            let label = iter.next().unwrap();
            assert_eq!("type", label.name);
            assert_eq!("duplex", label.value);
            assert_eq!(value.value, 1395.0);
            assert_eq!(value.timestamp, Some(-1));
        }
    }

    #[test]
    fn test_sample_line_parser_failure_01() {
        init_test_logging();

        let cases = [
            r#"data_sent:bytes{th_id="worker_0",type="duplex"}"#,
            r#"data_sent:bytes { th_id = "worker_0" , type = "duplex" }   1395  -1  some-more-text"#,
            "foo{bar=",
            "foo bar",
        ];
        for expr in cases {
            info!("Testing failure expr: '{expr}'");
            assert!(sample_line_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_comment_line_parser() {
        init_test_logging();

        let success_cases = [
            ("# a comment", "a comment"),
            ("  #    Something else", "Something else"),
            ("#", ""),
        ];
        for (expr, expected_comment) in success_cases {
            info!("Testing successful expr: '{expr}'");
            let comment = match comment_line_parser.parse(expr) {
                Ok(Line::Comment(comment)) => comment,
                res => panic!("Received unexpected {res:?}"),
            };
            assert_eq!(expected_comment, comment);
        }

        let error_cases = ["", "^# something"];
        for expr in error_cases {
            info!("Testing failure expr: '{expr}'");
            assert!(comment_line_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_help_line_parser() {
        init_test_logging();

        let success_cases = [
            (
                "# HELP http_request_duration_seconds A histogram of the request duration.",
                (
                    "http_request_duration_seconds",
                    "A histogram of the request duration.",
                ),
            ),
            (
                "  # HELP name long description",
                ("name", "long description"),
            ),
            (r"# HELP name first\nsecond \\ end", ("name", "first\nsecond \\ end")),
            ("# HELP name", ("name", "")),
        ];
        for (expr, (expected_name, expected_desc)) in success_cases {
            info!("Testing successful expr: '{expr}'");
            let (name, desc) = match help_line_parser.parse(expr) {
                Ok(Line::Help { name, desc }) => (name, desc),
                res => panic!("Received unexpected {res:?}"),
            };
            assert_eq!(expected_name, name);
            assert_eq!(expected_desc, desc);
        }

        let error_cases = ["", "# something", "# HELP", "# HELPER name desc"];
        for expr in error_cases {
            info!("Testing failure expr: '{expr}'");
            assert!(help_line_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_type_line_parser() {
        init_test_logging();

        let expected_name = "test";
        let success_cases = [
            ("# TYPE test histogram", Type::Histogram),
            ("# TYPE test summary", Type::Summary),
            ("# TYPE test counter", Type::Counter),
            ("# TYPE test gauge", Type::Gauge),
            ("# TYPE test untyped", Type::Untyped),
            ("# TYPE test Summary", Type::Summary),
            ("# TYPE test gaugehistogram", Type::GaugeHistogram),
            ("# TYPE test stateset", Type::StateSet),
        ];
        for (expr, expected_kind) in success_cases {
            info!("Testing successful expr: '{expr}'");
            let (name, kind) = match type_line_parser.parse(expr) {
                Ok(Line::Type { name, kind }) => (name, kind),
                res => panic!("Received unexpected {res:?}"),
            };
            assert_eq!(expected_name, name);
            assert_eq!(expected_kind, kind);
        }

        let error_cases = ["", "# TYPE test something", "# TYPE", "# TYPE test"];
        for expr in error_cases {
            info!("Testing failure expr: '{expr}'");
            assert!(type_line_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_metric_line_parser() {
        init_test_logging();

        let cases = [
            "# TYPE test histogram",
            "# TYPE test summary",
            "# TYPE test counter",
            "# TYPE test gauge",
            "# TYPE test untyped",
            "# TYPE test Summary",
            "# HELP http_request_duration_seconds A histogram of the request duration.",
            "  # HELP name long description",
            "# a comment",
            r#"data_sent:bytes{th_id="worker_0",type="duplex"} 1395 -1"#,
            r#"tower:histogram_bucket{name="handler",th_id="worker_0",type="1",le="64"} 0"#,
            r#"tower:histogram_bucket{name="handler",th_id="worker_0",type="1",le="+Inf"} 0"#,
            r#"tower:histogram_sum{name="handler",th_id="worker_0",type="1"} 0"#,
            r#"tower:histogram_count{name="handler",th_id="worker_0",type="1"} 0"#,
        ];
        for expr in cases {
            info!("Testing successful expr: '{expr}'");
            assert!(metric_line_parser.parse(expr).is_ok());
        }
    }

    #[rstest]
    fn test_scrape_parser(#[values(EXAMPLE_01, NODE_EXPORTER_01)] data: &str) {
        init_test_logging();

        let expected_len = data.lines().count();
        let lines = match scrape_lines_parser.parse(data) {
            Ok(lines) => lines,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(lines.len(), expected_len);
    }

    #[test]
    fn test_scrape_success_01() {
        init_test_logging();

        let input = r#"
                # TYPE go_memstats_frees_total counter
                # HELP go_memstats_frees_total Total number of frees.
                go_memstats_frees_total 4.130418363e+09
            "#;
        let input = prepare_test_data(input);
        let (mut blocks, maybe_error) = parse_blocks(&input);
        assert!(maybe_error.is_none());
        assert_eq!(blocks.len(), 1);
        let block = blocks.pop().unwrap();
        assert_eq!(block.kind, Some(Type::Counter));
        assert_eq!(block.help_desc.as_deref(), Some("Total number of frees."));
        assert_eq!(block.name, "go_memstats_frees_total");
        assert_eq!(block.samples[0].value.value, 4.130418363e+09);
        assert_eq!(block.samples[0].line_no, 2);
    }

    #[test]
    fn test_scrape_success_empty() {
        init_test_logging();

        for input in ["", "\n\n", "# just a comment\n"] {
            let families = parse_families(input).unwrap();
            assert!(families.is_empty());
        }
    }

    #[test]
    fn test_scrape_without_samples_01() {
        init_test_logging();

        let inputs = [
            r#"
                # HELP http_request_duration_seconds A histogram of the request duration.
                # TYPE http_request_duration_seconds histogram
            "#,
            r#"
                # TYPE http_request_duration_seconds histogram
            "#,
        ];
        for input in inputs.iter().map(|i| prepare_test_data(i)) {
            let (blocks, maybe_error) = parse_blocks(&input);
            assert!(maybe_error.is_none());
            assert_eq!(blocks.len(), 1);
            assert_eq!(blocks[0].name, "http_request_duration_seconds");
            assert_eq!(blocks[0].kind, Some(Type::Histogram));
            assert!(blocks[0].samples.is_empty());
            assert!(parse_families(&input).unwrap().is_empty());
        }
    }

    #[test]
    fn test_scrape_parse_failure_02() {
        init_test_logging();

        let inputs = [
            r#"
                # TYPE http_request_duration_seconds histogram
                # TYPE http_request_duration_seconds histogram
            "#,
            r#"
                # HELP go_info Information about the Go environment.
                # HELP go_info Information about the Go environment.
            "#,
        ];
        let error_reasons = [
            "Metric http_request_duration_seconds TYPE section appeared multiple times",
            "Metric go_info HELP section appeared multiple times",
        ];
        for (input, reason) in inputs
            .iter()
            .map(|i| prepare_test_data(i))
            .zip(error_reasons)
        {
            let (blocks, maybe_error) = parse_blocks(&input);
            assert_eq!(blocks.len(), 1);
            assert!(blocks[0].samples.is_empty());
            let ScrapeParseError::Collect(metric_errors) = maybe_error.unwrap() else {
                panic!("expected metric errors");
            };
            assert_eq!(metric_errors.len(), 1);
            assert_eq!(metric_errors[0].reason, reason);
            assert_eq!(metric_errors[0].line_no, 1..2);
            assert!(parse_families(&input).is_err());
        }
    }

    #[test]
    fn test_scrape_error_display() {
        init_test_logging();

        let input = prepare_test_data(
            r#"
                # TYPE rpc summary
                # TYPE rpc summary
                dup{a="1",a="2"} 1
            "#,
        );
        let err = parse_families(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to assemble metric families\n  line 2: Metric rpc TYPE section appeared multiple times"
        );

        let input = prepare_test_data(
            r#"
                # TYPE rpc summary
                rpc_sum 1
                dup{a="1",a="2"} 1
                other{a="1",a="2"} 1
            "#,
        );
        let err = parse_families(&input).unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to assemble metric families\n  line 3: Metric dup has duplicate label a\n  line 4: Metric other has duplicate label a"
        );

        let err = parse_reader(&[0xff, 0xfe][..]).unwrap_err();
        assert!(err.to_string().starts_with("failed to read exposition text: "));
    }

    #[test]
    fn test_scrape_without_samples_02() {
        init_test_logging();

        let inputs = [
            r#"
                # TYPE http_request_duration_seconds histogram
                # TYPE http_request counter
            "#,
            r#"
                # HELP go_info Information about the Go environment.
                # HELP not_go_info No information about the Go environment.
            "#,
            r#"
                # HELP go_info Information about the Go environment.
                # TYPE http_request counter
            "#,
        ];
        for input in inputs.iter().map(|i| prepare_test_data(i)) {
            let (blocks, maybe_error) = parse_blocks(&input);
            assert!(maybe_error.is_none());
            assert_eq!(blocks.len(), 2);
            assert!(blocks.iter().all(|block| block.samples.is_empty()));
            assert_eq!(blocks[1].line_no, 1);
            assert!(parse_families(&input).unwrap().is_empty());
        }
    }

    #[test]
    fn test_scrape_without_samples_03() {
        init_test_logging();

        let inputs = [
            r#"
                # HELP jobs_total Jobs.
                # TYPE jobs_total counter
                # HELP up Up.
                # TYPE up gauge
                up 1
            "#,
            r#"
                up 1
                # HELP idle_total Idle.
                # TYPE idle_total counter
            "#,
            r#"
                # TYPE idle_total counter
                up 1
            "#,
        ];
        for input in inputs.iter().map(|i| prepare_test_data(i)) {
            let families = parse_families(&input).unwrap();
            assert_eq!(families.len(), 1);
            assert_eq!(families["up"].metrics.len(), 1);
            assert_eq!(families["up"].metrics[0].value.scalar(), 1.0);
        }
    }

    #[test]
    fn test_scrape_parse_mix_01() {
        init_test_logging();

        let input = r#"
                # HELP go_info Information about the Go environment.
                go_info{version="go1.15.6"} 1
                # TYPE go_memstats_alloc_bytes gauge
            "#;
        let input = prepare_test_data(input);

        let (mut blocks, maybe_error) = parse_blocks(&input);
        assert!(maybe_error.is_none());
        assert_eq!(blocks.len(), 2);
        let empty = blocks.pop().unwrap();
        assert_eq!(empty.name, "go_memstats_alloc_bytes");
        assert!(empty.samples.is_empty());
        let mut block = blocks.pop().unwrap();
        assert_eq!(block.name, "go_info");
        assert_eq!(
            block.help_desc.as_deref(),
            Some("Information about the Go environment.")
        );
        assert_eq!(block.samples.len(), 1);
        let sample = block.samples.pop().unwrap();
        assert_eq!(sample.value.value_type, ValueType::Sample);
        assert_eq!(sample.value.value, 1.0);
        assert_eq!(sample.value.timestamp, None);
        assert_eq!(sample.labels.len(), 1);
        assert_eq!(sample.labels[0].name, "version");
        assert_eq!(sample.labels[0].value, "go1.15.6");

        let families = parse_families(&input).unwrap();
        assert_eq!(families.len(), 1);
        assert!(families.contains_key("go_info"));
    }

    #[test]
    fn test_scrape_suffixes() {
        init_test_logging();

        let input = r#"
            # TYPE queue_depth gaugehistogram
            queue_depth_bucket{le="1"} 3
            queue_depth_bucket{le="+Inf"} 5
            queue_depth_gsum 8
            queue_depth_gcount 5
            # TYPE build info
            build_info{version="1.2.3"} 1
        "#;
        let input = prepare_test_data(input);
        let (blocks, maybe_error) = parse_blocks(&input);
        assert!(maybe_error.is_none());
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].name, "queue_depth");
        let value_types = blocks[0]
            .samples
            .iter()
            .map(|sample| sample.value.value_type)
            .collect::<Vec<_>>();
        assert_eq!(
            value_types,
            [
                ValueType::Sample,
                ValueType::Sample,
                ValueType::Sum,
                ValueType::Count
            ]
        );
        assert_eq!(blocks[1].name, "build");
        assert_eq!(blocks[1].samples.len(), 1);
    }

    #[test]
    fn test_malformed_scrape() {
        init_test_logging();

        for input in ["foo{bar=", "foo{bar=\"baz\"} abc", "foo 1 2 3"] {
            let res = parse_families(input);
            assert!(
                matches!(res, Err(ScrapeParseError::Parse(_))),
                "unexpected {res:?}"
            );
        }
    }

    #[test]
    fn test_parse_reader() {
        init_test_logging();

        let families = parse_reader(EXAMPLE_01.as_bytes()).unwrap();
        assert_eq!(families.len(), 6);

        let invalid_utf8: &[u8] = &[b'a', b' ', 0xff, 0xfe];
        let res = parse_reader(invalid_utf8);
        assert!(matches!(res, Err(ScrapeParseError::Read(_))));
    }
}
