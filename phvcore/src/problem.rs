//! Reading allocation problems from disk.
//!
//! The native format is line-oriented; `#` starts a comment. Slices are
//! written `name` (whole field) or `name[lo:hi]`.
//!
//! ```text
//! groups 4
//! container normal 8 48
//! parser 8 4
//! field hdr.a 4 extracted
//! field meta.b 12 egress solitary size=16 align=3 max_bytes=2
//! mutex hdr.a meta.b
//! cluster
//! list hdr.a hdr.c[0:3]
//! align hdr.a meta.d
//! slice meta.b
//! wide 0 1
//! stride 4 2 3
//! action set_a hdr.a <- meta.d
//! action set_a hdr.c[0:3] <- const
//! ```
//!
//! `wide` and `stride` name lists of the current cluster by their order of
//! appearance. Actions with the same name are merged.

use crate::{
    helpe::*,
    actions::{Action, Move, MoveActionConstraints, Operand},
};

/// Everything one allocation run needs.
pub struct Problem {
    pub phv:        PhvInfo,
    pub device:     PhvSpec,
    pub clusters:   Vec<SuperCluster>,
    pub actions:    MoveActionConstraints,
}

#[derive(Error, Debug)]
pub enum ProblemError {
    #[error("line {line}: {message}")]
    Syntax {
        line:       usize,
        message:    String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Defines the interface for reading problems.
///
/// Implement it to feed the allocator from another front end.
pub trait ProblemGen {
    fn new(path: PathBuf) -> Self;
    fn read_problem(&self) -> Result<Problem, ProblemError>;
}

pub struct PhvTextParser {
    pub path: PathBuf,
}

impl ProblemGen for PhvTextParser {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
        }
    }

    fn read_problem(&self) -> Result<Problem, ProblemError> {
        let fd = std::fs::File::open(self.path.as_path())?;

        parse_problem(BufReader::new(fd))
    }
}

pub fn read_from_path<T>(file_path: PathBuf) -> Result<Problem, ProblemError>
where T: ProblemGen {
    let parser = T::new(file_path);

    parser.read_problem()
}

#[derive(Default)]
struct ClusterDraft {
    lists:      Vec<Vec<FieldSlice>>,
    aligned:    Vec<Vec<FieldSlice>>,
    standalone: Vec<FieldSlice>,
    wide:       Vec<(u32, u32)>,
    strides:    Vec<(Vec<u32>, u32)>,
}

impl ClusterDraft {
    fn build(self, id: u32) -> SuperCluster {
        let mut sc = SuperCluster::new(self.lists, self.aligned, self.standalone).with_id(id);
        for (lo, hi) in self.wide {
            sc = sc.with_wide_arith(SliceListId(lo), SliceListId(hi));
        }
        for (lists, step) in self.strides {
            sc = sc.with_stride(lists.into_iter().map(SliceListId).collect(), step);
        }

        sc
    }
}

struct LineParser<'p> {
    line:   usize,
    phv:    &'p PhvInfo,
}

impl LineParser<'_> {
    fn err(&self, message: impl Into<String>) -> ProblemError {
        ProblemError::Syntax {
            line:       self.line,
            message:    message.into(),
        }
    }

    fn number<T: std::str::FromStr>(&self, s: &str) -> Result<T, ProblemError> {
        s.parse().map_err(|_| self.err(format!("bad number `{s}`")))
    }

    fn size(&self, s: &str) -> Result<ContainerSize, ProblemError> {
        ContainerSize::from_bits(self.number(s)?)
            .ok_or_else(|| self.err(format!("no {s}-bit containers")))
    }

    fn kind(&self, s: &str) -> Result<ContainerKind, ProblemError> {
        match s {
            "normal"    => Ok(ContainerKind::Normal),
            "mocha"     => Ok(ContainerKind::Mocha),
            "dark"      => Ok(ContainerKind::Dark),
            "tagalong"  => Ok(ContainerKind::Tagalong),
            _           => Err(self.err(format!("unknown container kind `{s}`"))),
        }
    }

    fn slice(&self, s: &str) -> Result<FieldSlice, ProblemError> {
        let (name, range) = match s.split_once('[') {
            Some((name, rest)) => (name, Some(rest.strip_suffix(']').ok_or_else(|| self.err(format!("bad slice `{s}`")))?)),
            None => (s, None),
        };
        let id = self.phv.by_name(name).ok_or_else(|| self.err(format!("unknown field `{name}`")))?;
        let f = self.phv.field(id);
        let Some(range) = range else {
            return Ok(f.whole());
        };
        let (lo, hi) = range.split_once(':').ok_or_else(|| self.err(format!("bad slice `{s}`")))?;
        let (lo, hi): (Bits, Bits) = (self.number(lo)?, self.number(hi)?);
        if lo > hi || hi >= f.size {
            return Err(self.err(format!("slice `{s}` out of {}<{}>", f.name, f.size)));
        }

        Ok(f.slice(lo, hi))
    }

    fn field(&self, words: &[&str]) -> Result<Field, ProblemError> {
        let [name, size, flags @ ..] = words else {
            return Err(self.err("expected `field <name> <bits> [flags]`"));
        };
        let size: Bits = self.number(size)?;
        if size == 0 {
            return Err(self.err(format!("field `{name}` has zero size")));
        }
        if self.phv.by_name(name).is_some() {
            return Err(self.err(format!("field `{name}` declared twice")));
        }
        let mut f = Field::new(name, size, Gress::Ingress);
        for flag in flags {
            match flag.split_once('=') {
                None => match *flag {
                    "egress"        => f.gress = Gress::Egress,
                    "ingress"       => f.gress = Gress::Ingress,
                    "solitary"      => f.solitary = true,
                    "padding"       => f.padding = true,
                    "extracted"     => f.extracted = true,
                    "deparsed"      => f.deparsed = true,
                    "mocha"         => f.mocha_candidate = true,
                    "dark"          => f.dark_candidate = true,
                    "tagalong"      => f.tagalong_candidate = true,
                    "exact"         => f.exact_containers = true,
                    "bottom"        => f.deparsed_bottom_bits = true,
                    "key"           => f.table_key = true,
                    _               => return Err(self.err(format!("unknown field flag `{flag}`"))),
                },
                Some((k, v)) => match k {
                    "kind"          => f.required_kind = Some(self.kind(v)?),
                    "size"          => f.required_size = Some(self.size(v)?),
                    "align"         => f.alignment = Some(self.number::<Bits>(v)? % 8),
                    "max_bytes"     => f.max_container_bytes = Some(self.number(v)?),
                    "mode"          => f.write_mode = match v {
                        "extract"   => ParserWriteMode::Extract,
                        "or"        => ParserWriteMode::BitwiseOr,
                        "clear"     => ParserWriteMode::ClearOnWrite,
                        _           => return Err(self.err(format!("unknown write mode `{v}`"))),
                    },
                    _               => return Err(self.err(format!("unknown field option `{k}`"))),
                },
            }
        }

        Ok(f)
    }
}

/// Parses a whole problem. Fields must be declared before they are used.
pub fn parse_problem<R: BufRead>(reader: R) -> Result<Problem, ProblemError> {
    let mut phv = PhvInfo::new();
    let mut device = PhvSpec::new();
    let mut declared_device = false;
    let mut drafts: Vec<ClusterDraft> = vec![];
    let mut actions: IndexMap<String, Action> = IndexMap::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let text = line.split('#').next().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        let words = text.split_whitespace().collect_vec();
        let p = LineParser { line: idx + 1, phv: &phv };
        let in_cluster = |what: &str| {
            if drafts.is_empty() {
                Err(p.err(format!("`{what}` outside of a cluster")))
            } else {
                Ok(drafts.len() - 1)
            }
        };

        match words[0] {
            "groups" => {
                let [_, n] = words[..] else {
                    return Err(p.err("expected `groups <n>`"));
                };
                device.mau_groups = p.number(n)?;
                declared_device = true;
            },
            "container" => {
                let [_, kind, bits, count] = words[..] else {
                    return Err(p.err("expected `container <kind> <bits> <count>`"));
                };
                device.add_containers(p.kind(kind)?, p.size(bits)?, p.number(count)?);
                declared_device = true;
            },
            "parser" | "deparser" => {
                let [which, bits, width] = words[..] else {
                    return Err(p.err("expected `parser|deparser <bits> <width>`"));
                };
                let (size, width): (ContainerSize, u32) = (p.size(bits)?, p.number(width)?);
                if width == 0 {
                    return Err(p.err("zero group width"));
                }
                if which == "parser" {
                    device.set_parser_group_width(size, width);
                } else {
                    device.set_deparser_group_width(size, width);
                }
            },
            "field" => {
                let f = p.field(&words[1..])?;
                phv.add_field(f);
            },
            "mutex" => {
                let [_, a, b] = words[..] else {
                    return Err(p.err("expected `mutex <field> <field>`"));
                };
                let (a, b) = (p.slice(a)?.field, p.slice(b)?.field);
                phv.set_mutex(a, b);
            },
            "cluster" => drafts.push(ClusterDraft::default()),
            "list" | "align" => {
                let at = in_cluster(words[0])?;
                let slices = words[1..].iter().map(|s| p.slice(s)).collect::<Result<Vec<_>, _>>()?;
                if slices.is_empty() {
                    return Err(p.err(format!("empty `{}`", words[0])));
                }
                if words[0] == "align" && slices.iter().any(|s| s.size() != slices[0].size()) {
                    return Err(p.err("aligned slices differ in width"));
                }
                let draft = &mut drafts[at];
                if words[0] == "list" {
                    draft.lists.push(slices);
                } else {
                    draft.aligned.push(slices);
                }
            },
            "slice" => {
                let at = in_cluster("slice")?;
                let slices = words[1..].iter().map(|s| p.slice(s)).collect::<Result<Vec<_>, _>>()?;
                drafts[at].standalone.extend(slices);
            },
            "wide" => {
                let at = in_cluster("wide")?;
                let [_, lo, hi] = words[..] else {
                    return Err(p.err("expected `wide <list> <list>`"));
                };
                let pair = (p.number(lo)?, p.number(hi)?);
                let n = drafts[at].lists.len() as u32;
                if pair.0 >= n || pair.1 >= n {
                    return Err(p.err("`wide` names an undeclared list"));
                }
                drafts[at].wide.push(pair);
            },
            "stride" => {
                let at = in_cluster("stride")?;
                let [_, step, lists @ ..] = &words[..] else {
                    return Err(p.err("expected `stride <step> <list>...`"));
                };
                let step: u32 = p.number(step)?;
                let lists = lists.iter().map(|l| p.number::<u32>(l)).collect::<Result<Vec<_>, _>>()?;
                let n = drafts[at].lists.len() as u32;
                if step == 0 || lists.len() < 2 || lists.iter().any(|l| *l >= n) {
                    return Err(p.err("bad `stride`"));
                }
                drafts[at].strides.push((lists, step));
            },
            "action" => {
                let [_, name, dst, "<-", src] = words[..] else {
                    return Err(p.err("expected `action <name> <dst> <- <src>`"));
                };
                let dst = p.slice(dst)?;
                let src = match src {
                    "const" => Operand::Const,
                    "ad"    => Operand::ActionData,
                    s       => {
                        let s = p.slice(s)?;
                        if s.size() != dst.size() {
                            return Err(p.err("move width mismatch"));
                        }
                        Operand::Field(s)
                    },
                };
                actions.entry(name.to_string())
                    .or_insert_with(|| Action::new(name))
                    .moves
                    .push(Move { dst, src });
            },
            other => return Err(p.err(format!("unknown directive `{other}`"))),
        }
    }

    if !declared_device {
        device = PhvSpec::default();
    }
    let clusters = drafts.into_iter()
        .enumerate()
        .map(|(i, d)| d.build(i as u32))
        .collect();
    debug!("Read {} fields and {} actions", phv.num_fields(), actions.len());

    Ok(Problem {
        phv,
        device,
        clusters,
        actions: MoveActionConstraints::new(actions.into_values().collect()),
    })
}
