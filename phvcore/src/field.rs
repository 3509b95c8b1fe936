use crate::helpe::*;

impl Field {
    /// Creates an unconstrained, normal-only field. The id is assigned by
    /// [`PhvInfo::add_field`].
    pub fn new(name: &str, size: Bits, gress: Gress) -> Self {
        assert!(size > 0, "Field {name} has zero size");
        Self {
            id:                     FieldId(0),
            name:                   name.to_string(),
            size,
            gress,
            solitary:               false,
            padding:                false,
            extracted:              false,
            deparsed:               false,
            write_mode:             ParserWriteMode::Extract,
            mocha_candidate:        false,
            dark_candidate:         false,
            tagalong_candidate:     false,
            required_kind:          None,
            required_size:          None,
            alignment:              None,
            max_container_bytes:    None,
            exact_containers:       false,
            deparsed_bottom_bits:   false,
            table_key:              false,
            alloc:                  vec![],
        }
    }

    /// Whether the field may live in a container of `kind` at all.
    pub fn can_use_kind(&self, kind: ContainerKind) -> bool {
        if let Some(k) = self.required_kind {
            return k == kind;
        }
        match kind {
            ContainerKind::Normal   => true,
            ContainerKind::Mocha    => self.mocha_candidate,
            ContainerKind::Dark     => self.dark_candidate,
            ContainerKind::Tagalong => self.tagalong_candidate,
        }
    }

    #[inline(always)]
    pub fn whole(&self) -> FieldSlice {
        FieldSlice {
            field:  self.id,
            range:  BitRange::from_lo_width(0, self.size),
        }
    }

    #[inline(always)]
    pub fn slice(&self, lo: Bits, hi: Bits) -> FieldSlice {
        assert!(hi < self.size, "Slice [{lo}:{hi}] out of {}<{}>", self.name, self.size);
        FieldSlice {
            field:  self.id,
            range:  BitRange::new(lo, hi),
        }
    }

    pub fn get_alloc(&self) -> &[AllocSlice] {
        &self.alloc
    }
}

impl FieldSlice {
    pub fn new(field: FieldId, lo: Bits, hi: Bits) -> Self {
        Self { field, range: BitRange::new(lo, hi) }
    }

    #[inline(always)]
    pub fn size(&self) -> Bits {
        self.range.width()
    }

    /// Splits the slice at `at` bits above its lsb.
    pub fn split(&self, at: Bits) -> (Self, Self) {
        debug_assert!(at > 0 && at < self.size(), "Bad split point");
        (
            Self { field: self.field, range: BitRange::new(self.range.lo, self.range.lo + at - 1) },
            Self { field: self.field, range: BitRange::new(self.range.lo + at, self.range.hi) },
        )
    }
}

impl AllocSlice {
    pub fn new(slice: FieldSlice, container: Container, container_lo: Bits) -> Self {
        Self {
            slice,
            container,
            container_range:    BitRange::from_lo_width(container_lo, slice.size()),
            live:               None,
        }
    }

    #[inline(always)]
    pub fn field(&self) -> FieldId {
        self.slice.field
    }

    #[inline(always)]
    pub fn width(&self) -> Bits {
        self.container_range.width()
    }

    /// Container position of field bit `bit`, if this slice holds it.
    pub fn container_bit_of(&self, bit: Bits) -> Option<Bits> {
        if bit >= self.slice.range.lo && bit <= self.slice.range.hi {
            Some(self.container_range.lo + (bit - self.slice.range.lo))
        } else { None }
    }

    /// Two slices may share container bits only if at least one of their
    /// liveness windows is known and they are disjoint.
    #[inline(always)]
    pub fn live_disjoint(&self, other: &Self) -> bool {
        match (self.live, other.live) {
            (Some(a), Some(b))  => a.disjoint(&b),
            _                   => false,
        }
    }
}

impl PhvInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a field, returning its id. Names must be unique.
    pub fn add_field(&mut self, mut f: Field) -> FieldId {
        assert!(self.by_name(&f.name).is_none(), "Duplicate field {}", f.name);
        let id = FieldId(self.fields.len() as u32);
        f.id = id;
        self.fields.push(f);

        id
    }

    #[inline(always)]
    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0 as usize]
    }

    #[inline(always)]
    pub fn field_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.fields[id.0 as usize]
    }

    pub fn by_name(&self, name: &str) -> Option<FieldId> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.id)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn set_mutex(&mut self, a: FieldId, b: FieldId) {
        self.mutex.insert((a.min(b), a.max(b)));
    }

    /// Control-flow mutual exclusion: the two fields are never live in the
    /// same packet, so they may overlay each other.
    #[inline(always)]
    pub fn is_mutex(&self, a: FieldId, b: FieldId) -> bool {
        a != b && self.mutex.contains(&(a.min(b), a.max(b)))
    }

    /// Binds a final placement fact to its field.
    pub fn add_alloc(&mut self, slice: AllocSlice) {
        self.field_mut(slice.field()).alloc.push(slice);
    }

    /// `name[lo:hi]`, or just `name` for whole-field slices.
    pub fn fmt_slice(&self, fs: &FieldSlice) -> String {
        let f = self.field(fs.field);
        if fs.range.lo == 0 && fs.range.width() == f.size {
            f.name.clone()
        } else {
            format!("{}{}", f.name, fs.range)
        }
    }

    pub fn fmt_alloc(&self, a: &AllocSlice) -> String {
        format!("{} -> {}{}", self.fmt_slice(&a.slice), a.container, a.container_range)
    }
}
