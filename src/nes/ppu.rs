use super::interrupt::InterruptLine;
use super::mapper::Mapper;
use super::palette::NES_PALETTE;

pub const FRAME_WIDTH: usize = 256;
pub const FRAME_HEIGHT: usize = 240;
pub const FRAME_BYTES: usize = FRAME_WIDTH * FRAME_HEIGHT * 3;

const CTRL_NMI_ENABLE: u8 = 0x80;
const CTRL_VRAM_INC_32: u8 = 0x04;
const CTRL_SPRITE_TABLE: u8 = 0x08;
const CTRL_BG_TABLE: u8 = 0x10;
const CTRL_SPRITE_SIZE_16: u8 = 0x20;

const MASK_GRAYSCALE: u8 = 0x01;
const MASK_SHOW_BG_LEFT: u8 = 0x02;
const MASK_SHOW_SPRITE_LEFT: u8 = 0x04;
const MASK_SHOW_BG: u8 = 0x08;
const MASK_SHOW_SPRITES: u8 = 0x10;

const STATUS_SPRITE_OVERFLOW: u8 = 0x20;
const STATUS_SPRITE_ZERO_HIT: u8 = 0x40;
const STATUS_VBLANK: u8 = 0x80;

// PPU cycles between the NMI edge and the CPU seeing it. A $2002 read inside
// this window clears VBlank and so cancels the edge.
const NMI_DELAY_CYCLES: u8 = 2;

pub const SCANLINES_PER_FRAME: u16 = 262;
pub const CYCLES_PER_SCANLINE: u16 = 341;
const POST_RENDER_LINE: u16 = 240;
const VBLANK_LINE: u16 = 241;
const PRE_RENDER_LINE: u16 = 261;

#[derive(Debug, Clone, Copy, Default)]
pub struct PpuDebugCounters {
    pub ticks: u64,
    pub frames: u64,
    pub vblank_entries: u64,
    pub vblank_suppressed: u64,
    pub nmi_edges: u64,
    pub nmi_fired: u64,
    pub sprite_overflow_events: u64,
    pub sprite0_hit_events: u64,
    pub status_reads: u64,
    pub pattern_reads: u64,
    pub nametable_reads: u64,
    pub palette_writes: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct SpriteSlot {
    y: u8,
    tile: u8,
    attributes: u8,
    x: u8,
    pattern_lo: u8,
    pattern_hi: u8,
}

pub struct Ppu {
    ctrl: u8,
    mask: u8,
    status: u8,

    oam_addr: u8,
    oam: [u8; 256],

    ciram: [u8; 0x800],
    palette_ram: [u8; 32],

    write_toggle: bool,
    v: u16,
    t: u16,
    fine_x: u8,
    read_buffer: u8,
    open_bus: u8,

    scanline: u16,
    cycle: u16,
    odd_frame: bool,
    frame_complete: bool,
    vblank_suppress: bool,
    nmi_output: bool,
    nmi_delay: u8,
    nmi: InterruptLine,

    next_tile_id: u8,
    next_tile_attr: u8,
    next_tile_lsb: u8,
    next_tile_msb: u8,
    bg_shift_pattern_lo: u16,
    bg_shift_pattern_hi: u16,
    bg_shift_attr_lo: u16,
    bg_shift_attr_hi: u16,

    next_sprites: [SpriteSlot; 8],
    next_sprite_count: usize,
    next_has_sprite_zero: bool,
    sprites: [SpriteSlot; 8],
    sprite_count: usize,
    has_sprite_zero: bool,

    line_buffer: [u8; FRAME_WIDTH],
    frame_buffer: Vec<u8>,
    debug: PpuDebugCounters,
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            ctrl: 0,
            mask: 0,
            status: 0,
            oam_addr: 0,
            oam: [0; 256],
            ciram: [0; 0x800],
            palette_ram: [0x0F; 32],
            write_toggle: false,
            v: 0,
            t: 0,
            fine_x: 0,
            read_buffer: 0,
            open_bus: 0,
            scanline: PRE_RENDER_LINE,
            cycle: 0,
            odd_frame: false,
            frame_complete: false,
            vblank_suppress: false,
            nmi_output: false,
            nmi_delay: 0,
            nmi: InterruptLine::default(),
            next_tile_id: 0,
            next_tile_attr: 0,
            next_tile_lsb: 0,
            next_tile_msb: 0,
            bg_shift_pattern_lo: 0,
            bg_shift_pattern_hi: 0,
            bg_shift_attr_lo: 0,
            bg_shift_attr_hi: 0,
            next_sprites: [SpriteSlot::default(); 8],
            next_sprite_count: 0,
            next_has_sprite_zero: false,
            sprites: [SpriteSlot::default(); 8],
            sprite_count: 0,
            has_sprite_zero: false,
            line_buffer: [0; FRAME_WIDTH],
            frame_buffer: vec![0; FRAME_BYTES],
            debug: PpuDebugCounters::default(),
        }
    }

    /// Console reset. Memories survive; registers and timing restart at the
    /// pre-render line.
    pub fn reset(&mut self) {
        self.ctrl = 0;
        self.mask = 0;
        self.write_toggle = false;
        self.t = 0;
        self.fine_x = 0;
        self.read_buffer = 0;
        self.scanline = PRE_RENDER_LINE;
        self.cycle = 0;
        self.odd_frame = false;
        self.frame_complete = false;
        self.vblank_suppress = false;
        self.nmi_output = false;
        self.nmi_delay = 0;
        self.nmi.lower();
        self.next_sprite_count = 0;
        self.sprite_count = 0;
        self.has_sprite_zero = false;
        self.next_has_sprite_zero = false;
    }

    pub fn frame_buffer(&self) -> &[u8] {
        &self.frame_buffer
    }

    pub fn frame_complete(&self) -> bool {
        self.frame_complete
    }

    pub fn clear_frame_complete(&mut self) {
        self.frame_complete = false;
    }

    pub fn take_nmi(&mut self) -> bool {
        self.nmi.take()
    }

    pub fn debug_ctrl(&self) -> u8 {
        self.ctrl
    }

    pub fn debug_mask(&self) -> u8 {
        self.mask
    }

    pub fn debug_status(&self) -> u8 {
        self.status
    }

    pub fn debug_vram_addr(&self) -> u16 {
        self.v
    }

    pub fn debug_scanline_cycle(&self) -> (u16, u16) {
        (self.scanline, self.cycle)
    }

    pub fn debug_peek_vram(&self, index: usize) -> u8 {
        self.ciram[index % self.ciram.len()]
    }

    pub fn debug_peek_palette(&self, index: usize) -> u8 {
        self.palette_ram[index % self.palette_ram.len()]
    }

    pub fn debug_peek_oam(&self, index: usize) -> u8 {
        self.oam[index % self.oam.len()]
    }

    pub fn debug_counters(&self) -> PpuDebugCounters {
        self.debug
    }

    pub fn cpu_read_register(&mut self, addr: u16, mapper: &mut dyn Mapper) -> u8 {
        let value = match addr & 0x0007 {
            2 => self.read_status(),
            4 => self.oam[self.oam_addr as usize],
            7 => {
                let ppu_addr = self.v & 0x3FFF;
                let value = self.ppu_read(ppu_addr, mapper);
                let result = if ppu_addr >= 0x3F00 {
                    // Palette reads bypass the buffer; the buffer picks up the
                    // nametable byte underneath.
                    self.read_buffer = self.ppu_read(ppu_addr - 0x1000, mapper);
                    value
                } else {
                    std::mem::replace(&mut self.read_buffer, value)
                };
                self.increment_vram_addr_cpu_access();
                result
            }
            _ => self.open_bus,
        };
        self.open_bus = value;
        value
    }

    fn read_status(&mut self) -> u8 {
        self.debug.status_reads += 1;

        // One cycle before VBlank: the flag never appears this frame.
        let at_vblank_edge = (self.scanline == POST_RENDER_LINE
            && self.cycle == CYCLES_PER_SCANLINE - 1)
            || (self.scanline == VBLANK_LINE && self.cycle <= 1);
        if at_vblank_edge {
            self.vblank_suppress = true;
            self.debug.vblank_suppressed += 1;
        }

        let value = (self.status & 0xE0) | (self.open_bus & 0x1F);
        self.status &= !STATUS_VBLANK;
        self.write_toggle = false;
        self.update_nmi_line();
        value
    }

    pub fn cpu_write_register(&mut self, addr: u16, value: u8, mapper: &mut dyn Mapper) {
        self.open_bus = value;
        match addr & 0x0007 {
            0 => {
                self.ctrl = value;
                self.t = (self.t & !0x0C00) | (((value as u16) & 0x03) << 10);
                self.update_nmi_line();
            }
            1 => self.mask = value,
            3 => self.oam_addr = value,
            4 => {
                self.oam[self.oam_addr as usize] = value;
                self.oam_addr = self.oam_addr.wrapping_add(1);
            }
            5 => {
                if !self.write_toggle {
                    self.fine_x = value & 0x07;
                    self.t = (self.t & !0x001F) | ((value as u16) >> 3);
                } else {
                    self.t = (self.t & !0x73E0)
                        | (((value as u16) & 0x07) << 12)
                        | (((value as u16) >> 3) << 5);
                }
                self.write_toggle = !self.write_toggle;
            }
            6 => {
                if !self.write_toggle {
                    self.t = (self.t & 0x00FF) | (((value as u16) & 0x3F) << 8);
                } else {
                    self.t = (self.t & 0x7F00) | value as u16;
                    self.v = self.t;
                }
                self.write_toggle = !self.write_toggle;
            }
            7 => {
                let ppu_addr = self.v & 0x3FFF;
                self.ppu_write(ppu_addr, value, mapper);
                self.increment_vram_addr_cpu_access();
            }
            _ => {}
        }
    }

    pub fn write_oam_dma(&mut self, bytes: &[u8; 256]) {
        for byte in bytes {
            self.oam[self.oam_addr as usize] = *byte;
            self.oam_addr = self.oam_addr.wrapping_add(1);
        }
    }

    pub fn tick(&mut self, mapper: &mut dyn Mapper) {
        self.debug.ticks += 1;

        if self.nmi_delay > 0 {
            self.nmi_delay -= 1;
            if self.nmi_delay == 0 && self.nmi_output {
                self.nmi.raise();
                self.debug.nmi_fired += 1;
            }
        }

        let visible_line = self.scanline < POST_RENDER_LINE;
        let pre_render = self.scanline == PRE_RENDER_LINE;
        let render_line = visible_line || pre_render;
        let rendering_enabled = self.rendering_enabled();

        if pre_render && self.cycle == 1 {
            self.status &= !(STATUS_VBLANK | STATUS_SPRITE_ZERO_HIT | STATUS_SPRITE_OVERFLOW);
            self.frame_complete = false;
            self.vblank_suppress = false;
            self.update_nmi_line();
        }

        if self.scanline == VBLANK_LINE && self.cycle == 1 {
            self.frame_complete = true;
            self.debug.frames += 1;
            if !self.vblank_suppress {
                self.status |= STATUS_VBLANK;
                self.debug.vblank_entries += 1;
            }
            self.vblank_suppress = false;
            self.update_nmi_line();
        }

        if visible_line && (1..=256).contains(&self.cycle) {
            self.render_pixel((self.cycle - 1) as usize);
            if self.cycle == 256 {
                self.flush_line();
            }
        }

        if render_line && rendering_enabled {
            if (1..=256).contains(&self.cycle) || (321..=336).contains(&self.cycle) {
                self.shift_background_registers();
                self.fetch_background(mapper);
            }

            if self.cycle == 65 {
                if visible_line {
                    self.evaluate_sprites();
                } else {
                    self.next_sprite_count = 0;
                    self.next_has_sprite_zero = false;
                }
            }

            if self.cycle == 256 {
                self.increment_y();
            }

            if self.cycle == 257 {
                self.load_background_shifters();
                self.copy_horizontal_bits();
                self.fetch_sprite_patterns(mapper);
            }

            if pre_render && (280..=304).contains(&self.cycle) {
                self.copy_vertical_bits();
            }

            if self.cycle == 338 || self.cycle == 340 {
                self.next_tile_id = self.ppu_read(0x2000 | (self.v & 0x0FFF), mapper);
            }
        }

        // Odd frames drop the last pre-render cycle while rendering.
        if pre_render && rendering_enabled && self.odd_frame && self.cycle == 339 {
            self.cycle = 0;
            self.scanline = 0;
            self.odd_frame = false;
            return;
        }

        self.cycle += 1;
        if self.cycle >= CYCLES_PER_SCANLINE {
            self.cycle = 0;
            self.scanline += 1;
            if self.scanline >= SCANLINES_PER_FRAME {
                self.scanline = 0;
                self.odd_frame = !self.odd_frame;
            }
        }
    }

    fn rendering_enabled(&self) -> bool {
        (self.mask & (MASK_SHOW_BG | MASK_SHOW_SPRITES)) != 0
    }

    fn update_nmi_line(&mut self) {
        let line = (self.ctrl & CTRL_NMI_ENABLE) != 0 && (self.status & STATUS_VBLANK) != 0;
        if line && !self.nmi_output {
            self.nmi_delay = NMI_DELAY_CYCLES;
            self.debug.nmi_edges += 1;
        } else if !line {
            self.nmi_delay = 0;
        }
        self.nmi_output = line;
    }

    fn fetch_background(&mut self, mapper: &mut dyn Mapper) {
        match (self.cycle - 1) & 0x07 {
            0 => {
                self.load_background_shifters();
                self.next_tile_id = self.ppu_read(0x2000 | (self.v & 0x0FFF), mapper);
            }
            2 => {
                let addr = 0x23C0
                    | (self.v & 0x0C00)
                    | ((self.v >> 4) & 0x0038)
                    | ((self.v >> 2) & 0x0007);
                let attr = self.ppu_read(addr, mapper);
                let shift = ((self.v >> 4) & 0x04) | (self.v & 0x02);
                self.next_tile_attr = (attr >> shift) & 0x03;
            }
            4 => {
                let addr = self.background_pattern_addr();
                self.next_tile_lsb = self.ppu_read(addr, mapper);
            }
            6 => {
                let addr = self.background_pattern_addr() + 8;
                self.next_tile_msb = self.ppu_read(addr, mapper);
            }
            7 => self.increment_coarse_x(),
            _ => {}
        }
    }

    fn background_pattern_addr(&self) -> u16 {
        let table = if (self.ctrl & CTRL_BG_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        };
        let fine_y = (self.v >> 12) & 0x07;
        table + (self.next_tile_id as u16) * 16 + fine_y
    }

    fn render_pixel(&mut self, x: usize) {
        let (bg_pixel, bg_palette) = self.background_sample(x);
        let sprite = self.sprite_sample(x);

        let mut palette_index = (bg_palette << 2) | bg_pixel;
        if bg_pixel == 0 {
            palette_index = 0;
        }
        if let Some((pixel, palette, behind_bg, sprite_zero)) = sprite {
            if sprite_zero
                && bg_pixel != 0
                && x < 255
                && (self.mask & (MASK_SHOW_BG | MASK_SHOW_SPRITES))
                    == (MASK_SHOW_BG | MASK_SHOW_SPRITES)
                && (self.status & STATUS_SPRITE_ZERO_HIT) == 0
            {
                self.status |= STATUS_SPRITE_ZERO_HIT;
                self.debug.sprite0_hit_events += 1;
            }
            if bg_pixel == 0 || !behind_bg {
                palette_index = 0x10 | (palette << 2) | pixel;
            }
        }

        let mut color = self.palette_ram[palette_ram_index(palette_index as u16)] & 0x3F;
        if (self.mask & MASK_GRAYSCALE) != 0 {
            color &= 0x30;
        }
        self.line_buffer[x] = color;
    }

    fn flush_line(&mut self) {
        let row = self.scanline as usize * FRAME_WIDTH * 3;
        for (x, &color) in self.line_buffer.iter().enumerate() {
            let rgb = NES_PALETTE[color as usize];
            let pixel = row + x * 3;
            self.frame_buffer[pixel..pixel + 3].copy_from_slice(&rgb);
        }
    }

    fn background_sample(&self, x: usize) -> (u8, u8) {
        if (self.mask & MASK_SHOW_BG) == 0 {
            return (0, 0);
        }
        if x < 8 && (self.mask & MASK_SHOW_BG_LEFT) == 0 {
            return (0, 0);
        }

        let bit = 0x8000u16 >> self.fine_x;

        let p0 = ((self.bg_shift_pattern_lo & bit) != 0) as u8;
        let p1 = ((self.bg_shift_pattern_hi & bit) != 0) as u8;
        let a0 = ((self.bg_shift_attr_lo & bit) != 0) as u8;
        let a1 = ((self.bg_shift_attr_hi & bit) != 0) as u8;

        ((p1 << 1) | p0, (a1 << 1) | a0)
    }

    /// First opaque sprite pixel at `x` in OAM order:
    /// (pixel, palette, behind background, is sprite zero).
    fn sprite_sample(&self, x: usize) -> Option<(u8, u8, bool, bool)> {
        if (self.mask & MASK_SHOW_SPRITES) == 0 {
            return None;
        }
        if x < 8 && (self.mask & MASK_SHOW_SPRITE_LEFT) == 0 {
            return None;
        }

        for (i, sprite) in self.sprites[..self.sprite_count].iter().enumerate() {
            let offset = x.wrapping_sub(sprite.x as usize);
            if offset >= 8 {
                continue;
            }

            let shift = 7 - offset;
            let p0 = (sprite.pattern_lo >> shift) & 0x01;
            let p1 = (sprite.pattern_hi >> shift) & 0x01;
            let pixel = (p1 << 1) | p0;
            if pixel == 0 {
                continue;
            }

            return Some((
                pixel,
                sprite.attributes & 0x03,
                (sprite.attributes & 0x20) != 0,
                i == 0 && self.has_sprite_zero,
            ));
        }

        None
    }

    fn sprite_height(&self) -> i16 {
        if (self.ctrl & CTRL_SPRITE_SIZE_16) != 0 {
            16
        } else {
            8
        }
    }

    /// Selects up to eight sprites for the next scanline. Past the eighth,
    /// the scan walks OAM diagonally the way the hardware does, which makes
    /// the overflow flag both miss and false-trigger.
    fn evaluate_sprites(&mut self) {
        let height = self.sprite_height();
        let in_range = |y: u8| {
            let row = self.scanline as i16 - y as i16;
            (0..height).contains(&row)
        };

        let mut found = 0usize;
        let mut has_zero = false;
        let mut slots = [SpriteSlot::default(); 8];
        let mut n = 0usize;

        while n < 64 && found < 8 {
            let base = n * 4;
            if in_range(self.oam[base]) {
                slots[found] = SpriteSlot {
                    y: self.oam[base],
                    tile: self.oam[base + 1],
                    attributes: self.oam[base + 2],
                    x: self.oam[base + 3],
                    pattern_lo: 0,
                    pattern_hi: 0,
                };
                has_zero |= n == 0;
                found += 1;
            }
            n += 1;
        }

        let mut m = 0usize;
        let mut overflow = false;
        while n < 64 {
            if in_range(self.oam[n * 4 + m]) {
                overflow = true;
                break;
            }
            n += 1;
            m = (m + 1) & 0x03;
        }

        if overflow && (self.status & STATUS_SPRITE_OVERFLOW) == 0 {
            self.status |= STATUS_SPRITE_OVERFLOW;
            self.debug.sprite_overflow_events += 1;
        }

        self.next_sprites = slots;
        self.next_sprite_count = found;
        self.next_has_sprite_zero = has_zero;
    }

    /// Pattern fetches for the next line. Empty slots still fetch tile $FF
    /// so scanline-counting mappers see the usual address-line activity.
    fn fetch_sprite_patterns(&mut self, mapper: &mut dyn Mapper) {
        let height = self.sprite_height() as u16;
        let target_line = if self.scanline == PRE_RENDER_LINE {
            0
        } else {
            self.scanline + 1
        };

        for i in 0..8 {
            let active = i < self.next_sprite_count;
            let slot = if active {
                self.next_sprites[i]
            } else {
                SpriteSlot {
                    y: 0xFF,
                    tile: 0xFF,
                    attributes: 0,
                    x: 0xFF,
                    pattern_lo: 0,
                    pattern_hi: 0,
                }
            };

            let mut row = if active {
                target_line.wrapping_sub(slot.y as u16 + 1) & 0x0F
            } else {
                0
            };
            if (slot.attributes & 0x80) != 0 {
                row = (height - 1) - row;
            }

            let addr = if height == 16 {
                let table = ((slot.tile & 0x01) as u16) * 0x1000;
                let tile = ((slot.tile & 0xFE) as u16) + (row / 8);
                table + tile * 16 + (row & 0x07)
            } else {
                let table = if (self.ctrl & CTRL_SPRITE_TABLE) != 0 {
                    0x1000
                } else {
                    0x0000
                };
                table + (slot.tile as u16) * 16 + (row & 0x07)
            };

            let mut low = self.ppu_read(addr, mapper);
            let mut high = self.ppu_read(addr + 8, mapper);
            if (slot.attributes & 0x40) != 0 {
                low = low.reverse_bits();
                high = high.reverse_bits();
            }

            self.sprites[i] = SpriteSlot {
                pattern_lo: if active { low } else { 0 },
                pattern_hi: if active { high } else { 0 },
                ..slot
            };
        }

        self.sprite_count = self.next_sprite_count;
        self.has_sprite_zero = self.next_has_sprite_zero;
    }

    fn shift_background_registers(&mut self) {
        self.bg_shift_pattern_lo <<= 1;
        self.bg_shift_pattern_hi <<= 1;
        self.bg_shift_attr_lo <<= 1;
        self.bg_shift_attr_hi <<= 1;
    }

    fn load_background_shifters(&mut self) {
        self.bg_shift_pattern_lo = (self.bg_shift_pattern_lo & 0xFF00) | self.next_tile_lsb as u16;
        self.bg_shift_pattern_hi = (self.bg_shift_pattern_hi & 0xFF00) | self.next_tile_msb as u16;

        let attr_lo = if (self.next_tile_attr & 0x01) != 0 { 0xFF } else { 0x00 };
        let attr_hi = if (self.next_tile_attr & 0x02) != 0 { 0xFF } else { 0x00 };
        self.bg_shift_attr_lo = (self.bg_shift_attr_lo & 0xFF00) | attr_lo;
        self.bg_shift_attr_hi = (self.bg_shift_attr_hi & 0xFF00) | attr_hi;
    }

    fn increment_coarse_x(&mut self) {
        if (self.v & 0x001F) == 31 {
            self.v &= !0x001F;
            self.v ^= 0x0400;
        } else {
            self.v = self.v.wrapping_add(1);
        }
    }

    fn increment_y(&mut self) {
        if (self.v & 0x7000) != 0x7000 {
            self.v = self.v.wrapping_add(0x1000);
            return;
        }

        self.v &= !0x7000;
        let mut y = (self.v & 0x03E0) >> 5;
        if y == 29 {
            y = 0;
            self.v ^= 0x0800;
        } else if y == 31 {
            y = 0;
        } else {
            y += 1;
        }
        self.v = (self.v & !0x03E0) | (y << 5);
    }

    fn copy_horizontal_bits(&mut self) {
        self.v = (self.v & !0x041F) | (self.t & 0x041F);
    }

    fn copy_vertical_bits(&mut self) {
        self.v = (self.v & !0x7BE0) | (self.t & 0x7BE0);
    }

    fn increment_vram_addr_cpu_access(&mut self) {
        // While rendering, $2007 access bumps coarse X and Y instead.
        let render_line = self.scanline < POST_RENDER_LINE || self.scanline == PRE_RENDER_LINE;
        if self.rendering_enabled() && render_line {
            self.increment_coarse_x();
            self.increment_y();
        } else if (self.ctrl & CTRL_VRAM_INC_32) != 0 {
            self.v = self.v.wrapping_add(32) & 0x7FFF;
        } else {
            self.v = self.v.wrapping_add(1) & 0x7FFF;
        }
    }

    fn ppu_read(&mut self, addr: u16, mapper: &mut dyn Mapper) -> u8 {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => {
                self.debug.pattern_reads += 1;
                mapper.observe_ppu_cycle(self.debug.ticks);
                mapper.read_chr(addr)
            }
            0x2000..=0x3EFF => {
                self.debug.nametable_reads += 1;
                mapper.read_nametable(0x2000 | (addr & 0x0FFF), &self.ciram)
            }
            _ => self.palette_ram[palette_ram_index(addr)],
        }
    }

    fn ppu_write(&mut self, addr: u16, value: u8, mapper: &mut dyn Mapper) {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => {
                mapper.observe_ppu_cycle(self.debug.ticks);
                mapper.write_chr(addr, value);
            }
            0x2000..=0x3EFF => {
                mapper.write_nametable(0x2000 | (addr & 0x0FFF), value, &mut self.ciram)
            }
            _ => {
                self.debug.palette_writes += 1;
                self.palette_ram[palette_ram_index(addr)] = value & 0x3F;
            }
        }
    }
}

/// $3F10/$14/$18/$1C alias the backdrop entries below them.
fn palette_ram_index(addr: u16) -> usize {
    let mut index = (addr & 0x1F) as usize;
    if index >= 16 && (index & 0x03) == 0 {
        index -= 16;
    }
    index
}
